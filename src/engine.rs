// Top-level execution context, passed by shared reference through
// compile and evaluate rather than having expressions hold
// back-references to each other. Owns the model graph, the expression
// table, the simulated clock and the seeded PRNG -- everything the VM
// needs that isn't local to a single opcode stream.
//
// The expression table is `Vec<RefCell<Expression>>` rather than
// `Vec<Expression>` with `&mut self` methods: `compute` must release
// its borrow of one expression before recursing into another (or
// itself, at a different cycle) via `PUSH_VAR`, and a `RefCell` per
// slot is what makes that possible without threading `&mut` through
// the whole call chain. This mirrors the arena-of-cells pattern used
// wherever a graph's nodes reference each other by index instead of
// by `Rc<RefCell<_>>` pointer, which is exactly what this engine needs
// because aspect expressions can reference each other cyclically.

use crate::clock::Clock;
use crate::error::CompileError;
use crate::expr::Expression;
use crate::model::{Aspect, AspectId};
use crate::opcode::ExprId;
use crate::scope::Model;
use crate::value::{self, COMPUTING, NOT_COMPUTED};
use crate::vm;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::HashMap;

pub struct Engine {
    pub model: Model,
    exprs: Vec<RefCell<Expression>>,
    aspect_to_expr: HashMap<AspectId, ExprId>,
    clock: RefCell<Clock>,
    rng: RefCell<StdRng>,
    call_stack: RefCell<Vec<ExprId>>,
    issues: RefCell<Vec<String>>,
    pub run_length: i64,
    pub look_ahead: i64,
}

impl Engine {
    pub fn new(model: Model, run_length: i64, look_ahead: i64, seed: u64) -> Engine {
        Engine {
            model,
            exprs: Vec::new(),
            aspect_to_expr: HashMap::new(),
            clock: RefCell::new(Clock::new()),
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            call_stack: RefCell::new(Vec::new()),
            issues: RefCell::new(Vec::new()),
            run_length,
            look_ahead,
        }
    }

    /// Register an expression's text against an aspect it belongs to.
    /// Compilation happens lazily on first `result()` call, not here.
    pub fn add_expression(&mut self, owner: AspectId, text: String) -> ExprId {
        let id = self.exprs.len();
        self.exprs.push(RefCell::new(Expression::new(owner.clone(), text)));
        self.aspect_to_expr.insert(owner, id);
        id
    }

    pub fn expr_id_of(&self, aspect: &AspectId) -> Option<ExprId> {
        self.aspect_to_expr.get(aspect).copied()
    }

    pub fn aspect(&self, aspect: &AspectId) -> Option<&Aspect> {
        self.model.aspects.get(aspect)
    }

    /// Upper clamp for a non-self `PUSH_VAR` reference: the run can be
    /// probed one cycle past its own look-ahead window before folding
    /// back to the last real slot.
    pub fn var_ref_max_cycle(&self) -> i64 {
        self.run_length + self.look_ahead + 1
    }

    /// Upper clamp for `PUSH_STATISTIC`: statistics never read into the
    /// look-ahead window, only the settled run.
    pub fn statistic_max_cycle(&self) -> i64 {
        self.run_length
    }

    pub fn clock_seconds(&self) -> f64 {
        self.clock.borrow().seconds()
    }

    pub fn wait(&self, dt: f64) -> f64 {
        self.clock.borrow_mut().wait(dt)
    }

    pub fn wait_until(&self, target: f64) -> f64 {
        self.clock.borrow_mut().wait_until(target)
    }

    pub fn reset_clock(&self) {
        self.clock.borrow_mut().reset();
    }

    pub fn uniform01(&self) -> f64 {
        self.rng.borrow_mut().random::<f64>()
    }

    pub fn issues(&self) -> Vec<String> {
        self.issues.borrow().clone()
    }

    /// The ids of expressions currently mid-`compute`, innermost last.
    /// An embedder wanting "what led to this" after a fault walks this
    /// alongside each expression's own `step` stack.
    pub fn call_stack(&self) -> Vec<ExprId> {
        self.call_stack.borrow().clone()
    }

    /// The trailing numeric suffix of the aspect owning expression
    /// `id`'s display name, used to resolve the `#` anchor (spec
    /// section 4.6). `None` when the name has no trailing digits.
    pub fn tail_number(&self, id: ExprId) -> Option<f64> {
        let owner = self.exprs.get(id)?.borrow().owner.clone();
        let aspect = self.model.aspects.get(&owner)?;
        trailing_number(&aspect.display_name)
    }

    pub fn record_opcodes(&self, id: ExprId, n: u64) {
        if let Some(cell) = self.exprs.get(id) {
            cell.borrow_mut().opcodes_executed += n;
        }
    }

    /// Compile the expression's text into an opcode stream if it
    /// hasn't been already. A compile failure is recorded on the
    /// expression and never retried -- the text didn't change, so
    /// re-parsing it would fail the same way.
    fn ensure_compiled(&self, id: ExprId) -> Result<(), CompileError> {
        let mut expr = self.exprs[id].borrow_mut();
        if expr.code.is_some() || expr.compile_issue.is_some() {
            return expr.compile_issue.clone().map_or(Ok(()), Err);
        }
        let owner = expr.owner.clone();
        let text = expr.text.clone();
        drop(expr);

        match crate::parser::compile(self, &owner, id, &text) {
            Ok(compiled) => {
                let mut expr = self.exprs[id].borrow_mut();
                expr.is_static = compiled.is_static;
                expr.code = Some(std::rc::Rc::new(compiled.code));
                Ok(())
            }
            Err(e) => {
                let mut expr = self.exprs[id].borrow_mut();
                expr.compile_issue = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Public entry point: the memoized, demand-driven value of
    /// expression `id` at cycle `t`. Triggers compilation and/or
    /// evaluation as needed.
    pub fn result(&self, id: ExprId, t: i64) -> f64 {
        if self.ensure_compiled(id).is_err() {
            return value::INVALID;
        }
        self.compute(id, t)
    }

    /// NOT_COMPUTED -> COMPUTING -> (CYCLIC | value) lifecycle for one
    /// cell of one expression's result vector. A second, re-entrant
    /// call while the first is still COMPUTING is exactly what "this
    /// expression participates in a reference cycle at this cycle"
    /// means, and is reported as CYCLIC rather than by recursing
    /// forever.
    fn compute(&self, id: ExprId, raw_t: i64) -> f64 {
        let eff_t = {
            let expr = self.exprs[id].borrow();
            if expr.is_static {
                0
            } else {
                raw_t
            }
        };
        if eff_t < 0 {
            return value::UNDEFINED;
        }

        {
            let mut expr = self.exprs[id].borrow_mut();
            expr.ensure_len(eff_t as usize + 1);
            let slot = expr.vector[eff_t as usize];
            if slot == COMPUTING {
                expr.vector[eff_t as usize] = value::CYCLIC;
                return value::CYCLIC;
            }
            if slot != NOT_COMPUTED {
                return slot;
            }
            expr.vector[eff_t as usize] = COMPUTING;
        }

        let code = self.exprs[id].borrow().code.clone().expect("ensure_compiled guarantees code is set");
        self.call_stack.borrow_mut().push(id);
        {
            let mut expr = self.exprs[id].borrow_mut();
            expr.step.push(eff_t);
        }

        let result = vm::run(self, id, eff_t, &code);

        self.call_stack.borrow_mut().pop();
        let mut expr = self.exprs[id].borrow_mut();
        expr.step.pop();
        expr.vector[eff_t as usize] = result;
        if expr.compute_issue.is_none() && (value::is_error(result) || result == value::UNDEFINED) {
            let message =
                format!("{} (t={}): {} resolved to {}", expr.owner.0, eff_t, expr.text, value::format_value(result));
            expr.compute_issue = Some(message.clone());
            self.issues.borrow_mut().push(message);
        }
        result
    }

    /// Discard every cached result and issue, re-seeding per-slot
    /// defaults from each expression's own default value. Used by the
    /// cycle driver between independent runs of the model.
    pub fn reset(&mut self, default_value: Option<f64>) {
        for cell in &self.exprs {
            cell.borrow_mut().reset(default_value);
        }
        self.reset_clock();
        self.issues.borrow_mut().clear();
    }
}

fn trailing_number(name: &str) -> Option<f64> {
    let digits: String = name.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        let forward: String = digits.chars().rev().collect();
        forward.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{normalize_id, FunctionId};

    fn aid(s: &str) -> AspectId {
        AspectId(normalize_id(s))
    }

    fn sample_engine() -> (Engine, ExprId) {
        let mut model = Model::new();
        model.add_function(crate::model::Function::new(FunctionId("f".into()), None));
        model.add_aspect(Aspect {
            id: aid("speed"),
            display_name: "speed".into(),
            owner: FunctionId("f".into()),
        });
        let mut engine = Engine::new(model, 5, 0, 42);
        let id = engine.add_expression(aid("speed"), "2 + 2".into());
        (engine, id)
    }

    #[test]
    fn tail_number_extracts_trailing_digits() {
        assert_eq!(trailing_number("buffer12"), Some(12.0));
        assert_eq!(trailing_number("buffer"), None);
    }

    #[test]
    fn result_memoizes_and_is_idempotent() {
        let (engine, id) = sample_engine();
        let first = engine.result(id, 0);
        let before = engine.exprs[id].borrow().opcodes_executed;
        let second = engine.result(id, 0);
        let after = engine.exprs[id].borrow().opcodes_executed;
        assert_eq!(first, second);
        assert_eq!(before, after, "a cached result must not re-execute opcodes");
    }
}
