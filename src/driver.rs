// Cycle driver. Builds the trigger sequence once
// -- a topological order over functions threaded by non-feedback
// couplings -- then, for each cycle, demands every function's output
// aspects in that order. Demanding a result is enough to run the
// whole dependency chain underneath it (`Engine::result` recurses as
// needed), so the driver itself never touches opcodes or expressions
// directly.

use crate::engine::Engine;
use crate::model::FunctionId;
use crate::scope::Model;
use std::collections::{HashMap, HashSet, VecDeque};

pub struct Driver<'a> {
    engine: &'a mut Engine,
    trigger_sequence: Vec<FunctionId>,
}

impl<'a> Driver<'a> {
    pub fn new(engine: &'a mut Engine) -> Driver<'a> {
        let trigger_sequence = build_trigger_sequence(&engine.model);
        Driver { engine, trigger_sequence }
    }

    pub fn trigger_sequence(&self) -> &[FunctionId] {
        &self.trigger_sequence
    }

    /// Run cycles `1..=run_length`, demanding every aspect owned by
    /// each function in trigger-sequence order.
    pub fn run(&mut self) {
        let run_length = self.engine.run_length;
        for t in 1..=run_length {
            self.run_cycle(t);
        }
    }

    pub fn run_cycle(&mut self, t: i64) {
        for fid in self.trigger_sequence.clone() {
            let aspects: Vec<_> = self
                .engine
                .model
                .aspects
                .values()
                .filter(|a| a.owner == fid)
                .map(|a| a.id.clone())
                .collect();
            for aid in aspects {
                if let Some(id) = self.engine.expr_id_of(&aid) {
                    self.engine.result(id, t);
                }
            }
        }
    }
}

/// Kahn's algorithm over functions, with edges from non-feedback
/// couplings (`from` -> `to`). Feedback couplings are excluded from
/// ordering entirely -- their source value is read from a previous
/// cycle at evaluation time, not waited on within the same cycle, so
/// they must not constrain this topological sort. Ties are broken by
/// function id so the sequence is deterministic across runs; any
/// function left unreached (a cycle the model shouldn't have, since
/// feedback couplings were supposed to break every loop) is appended
/// in id order rather than silently dropped.
fn build_trigger_sequence(model: &Model) -> Vec<FunctionId> {
    let mut in_degree: HashMap<FunctionId, usize> = model.functions.keys().cloned().map(|k| (k, 0)).collect();
    let mut adj: HashMap<FunctionId, Vec<FunctionId>> = HashMap::new();

    for c in &model.couplings {
        if c.feedback {
            continue;
        }
        if !model.functions.contains_key(&c.from) || !model.functions.contains_key(&c.to) {
            continue;
        }
        adj.entry(c.from.clone()).or_default().push(c.to.clone());
        *in_degree.entry(c.to.clone()).or_insert(0) += 1;
    }

    let mut initial: Vec<FunctionId> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| k.clone()).collect();
    initial.sort_by(|a, b| a.0.cmp(&b.0));
    let mut ready: VecDeque<FunctionId> = initial.into();

    let mut order = Vec::new();
    let mut seen: HashSet<FunctionId> = HashSet::new();

    while let Some(f) = ready.pop_front() {
        if !seen.insert(f.clone()) {
            continue;
        }
        order.push(f.clone());
        if let Some(next) = adj.get(&f) {
            let mut newly_ready = Vec::new();
            for n in next {
                if let Some(d) = in_degree.get_mut(n) {
                    *d -= 1;
                    if *d == 0 {
                        newly_ready.push(n.clone());
                    }
                }
            }
            newly_ready.sort_by(|a, b| a.0.cmp(&b.0));
            for n in newly_ready {
                ready.push_back(n);
            }
        }
    }

    let mut remaining: Vec<FunctionId> = model.functions.keys().filter(|k| !seen.contains(*k)).cloned().collect();
    remaining.sort_by(|a, b| a.0.cmp(&b.0));
    order.extend(remaining);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Aspect, Coupling, Function};

    fn fid(s: &str) -> FunctionId {
        FunctionId(s.to_string())
    }

    fn aid(s: &str) -> crate::model::AspectId {
        crate::model::AspectId(crate::model::normalize_id(s))
    }

    #[test]
    fn trigger_sequence_respects_coupling_order_and_skips_feedback() {
        let mut model = Model::new();
        model.add_function(Function::new(fid("a"), None));
        model.add_function(Function::new(fid("b"), None));
        model.add_function(Function::new(fid("c"), None));
        model.add_coupling(Coupling {
            from: fid("a"),
            to: fid("b"),
            to_connector: crate::model::Connector::Input,
            aspects: vec![],
            feedback: false,
        });
        model.add_coupling(Coupling {
            from: fid("c"),
            to: fid("a"),
            to_connector: crate::model::Connector::Input,
            aspects: vec![],
            feedback: true,
        });
        let seq = build_trigger_sequence(&model);
        let pos_a = seq.iter().position(|f| f == &fid("a")).unwrap();
        let pos_b = seq.iter().position(|f| f == &fid("b")).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn running_cycles_resolves_aspects_across_a_coupling() {
        let mut model = Model::new();
        model.add_function(Function::new(fid("source"), None));
        model.add_function(Function::new(fid("sink"), None));
        model.add_aspect(Aspect { id: aid("rate"), display_name: "rate".into(), owner: fid("source") });
        model.add_aspect(Aspect { id: aid("total"), display_name: "total".into(), owner: fid("sink") });
        model.add_coupling(Coupling {
            from: fid("source"),
            to: fid("sink"),
            to_connector: crate::model::Connector::Input,
            aspects: vec![aid("rate")],
            feedback: false,
        });

        let mut engine = Engine::new(model, 3, 0, 1);
        engine.add_expression(aid("rate"), "5".into());
        let total_id = engine.add_expression(aid("total"), "[rate] * 2".into());

        let mut driver = Driver::new(&mut engine);
        driver.run();
        assert_eq!(engine.result(total_id, 1), 10.0);
    }
}
