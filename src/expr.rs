// The expression object. Owns everything about one aspect's compiled
// program and its per-cycle memoization; the actual opcode dispatch
// loop lives in `vm.rs` because it needs cross-expression access the
// object itself must not hold (see `Engine::compute`).
//
// Keeps "static program" (`code`, `is_static`) separate from "mutable
// run state" (`vector`, `step`) even though both live on the same
// struct, because each aspect owns one long-lived, repeatedly
// re-entered evaluation rather than many short-lived runs of shared
// code -- the per-cycle result vector *is* the memoization table.

use crate::error::CompileError;
use crate::model::AspectId;
use crate::opcode::Opcode;
use crate::value::NOT_COMPUTED;
use std::rc::Rc;

/// Bound on the operand stack depth within a single opcode-stream
/// execution. Exceeding it coerces to `OVERFLOW` rather than growing
/// without limit -- malformed or pathological expressions fail safe.
pub const MAX_STACK: usize = 200;

#[derive(Clone, Debug)]
pub struct Expression {
    pub owner: AspectId,
    pub text: String,
    pub code: Option<Rc<Vec<Opcode>>>,
    pub vector: Vec<f64>,
    pub is_static: bool,
    pub compile_issue: Option<CompileError>,
    pub compute_issue: Option<String>,
    /// Nested-evaluation cycle stack: the `t` values currently being
    /// evaluated for this expression, innermost last. Mainly a
    /// diagnostic aid (it is what a call-stack trace walks), since
    /// cycle detection itself is driven by the `vector` state
    /// machine, not by inspecting this stack.
    pub step: Vec<i64>,
    /// Running count of opcodes dispatched while evaluating this
    /// expression, used by tests to verify idempotence (a second
    /// `result(t)` call for an already-resolved cycle must not
    /// execute any further opcodes).
    pub opcodes_executed: u64,
}

impl Expression {
    pub fn new(owner: AspectId, text: String) -> Expression {
        Expression {
            owner,
            text,
            code: None,
            vector: vec![NOT_COMPUTED],
            is_static: true,
            compile_issue: None,
            compute_issue: None,
            step: Vec::new(),
            opcodes_executed: 0,
        }
    }

    pub fn is_compiled(&self) -> bool {
        self.code.is_some()
    }

    /// Ensure the result vector is at least `len` long, filling new
    /// slots with `NOT_COMPUTED`. Static expressions never grow past
    /// length 1 (invariant 2): `t` is always folded to 0 for them
    /// before this is called.
    pub fn ensure_len(&mut self, len: usize) {
        if self.is_static {
            return;
        }
        if self.vector.len() < len {
            self.vector.resize(len, NOT_COMPUTED);
        }
    }

    /// reset(default_value): clears cached results and issues; the
    /// text is re-compiled lazily on next `compute`. An empty
    /// expression text initializes every slot to `default_value`
    /// instead of `NOT_COMPUTED`, for the common "no expression
    /// authored yet" case.
    pub fn reset(&mut self, default_value: Option<f64>) {
        self.compile_issue = None;
        self.compute_issue = None;
        self.step.clear();
        self.opcodes_executed = 0;
        let fill = if self.text.trim().is_empty() {
            default_value.unwrap_or(NOT_COMPUTED)
        } else {
            NOT_COMPUTED
        };
        for slot in self.vector.iter_mut() {
            *slot = fill;
        }
    }
}
