// Scoping resolver ("rule S"): an aspect's expression may reference
// any aspect carried by a coupling that terminates on its owning
// function, plus any aspect reachable from an ancestor function's
// outgoing couplings. This is graph reachability, not a lexical
// parent chain -- there is no single "enclosing scope", since
// visibility depends on which connector a coupling lands on and how
// far up the function hierarchy it was inherited from.
//
// A small, cheaply-constructed structure that, given an owner,
// answers "which names are visible from here", built once per compile
// instead of re-walked for every lookup.

use crate::model::{Aspect, AspectId, Connector, Coupling, Function, FunctionId};
use std::collections::{HashMap, HashSet};

/// The full FRAM model graph: every function, coupling and aspect the
/// engine knows about. Aspects are looked up by id from here when the
/// parser resolves a `[name]` reference.
#[derive(Default, Clone, Debug)]
pub struct Model {
    pub functions: HashMap<FunctionId, Function>,
    pub couplings: Vec<Coupling>,
    pub aspects: HashMap<AspectId, Aspect>,
}

impl Model {
    pub fn new() -> Model {
        Model::default()
    }

    pub fn add_function(&mut self, f: Function) {
        self.functions.insert(f.id.clone(), f);
    }

    pub fn add_coupling(&mut self, c: Coupling) {
        self.couplings.push(c);
    }

    pub fn add_aspect(&mut self, a: Aspect) {
        self.aspects.insert(a.id.clone(), a);
    }

    fn ancestors(&self, id: &FunctionId) -> Vec<FunctionId> {
        let mut chain = Vec::new();
        let mut cur = self.functions.get(id).and_then(|f| f.parent.clone());
        while let Some(p) = cur {
            chain.push(p.clone());
            cur = self.functions.get(&p).and_then(|f| f.parent.clone());
        }
        chain
    }

    /// Aspects carried by couplings whose `to` function is `id`,
    /// regardless of which connector they terminate at.
    fn aspects_terminating_at<'a>(&'a self, id: &'a FunctionId) -> impl Iterator<Item = &'a AspectId> + 'a {
        self.couplings
            .iter()
            .filter(move |c| &c.to == id)
            .flat_map(|c| c.aspects.iter())
    }

    /// Aspects reachable from an ancestor function via any outgoing
    /// coupling (i.e. carried on couplings whose `from` is the
    /// ancestor).
    fn aspects_reachable_from_ancestor(&self, ancestor: &FunctionId) -> Vec<AspectId> {
        self.couplings
            .iter()
            .filter(|c| &c.from == ancestor)
            .flat_map(|c| c.aspects.iter().cloned())
            .collect()
    }

    /// Rule S: the scope visible to an aspect owned by function `id`.
    /// When `connector` is `Some`, the scope is narrowed to aspects
    /// whose couplings terminate at that specific connector (used
    /// when compiling an "incoming expression" attached to a
    /// connector letter). `Connector::Output` may never narrow a
    /// scope this way -- the caller must reject that case before
    /// calling in (see `CompileError::OutputMustBeAspectRef`).
    pub fn visible_scope(&self, id: &FunctionId, connector: Option<Connector>) -> HashSet<AspectId> {
        let mut scope = HashSet::new();

        for a in self.aspects_terminating_at(id) {
            match connector {
                None => {
                    scope.insert(a.clone());
                }
                Some(want) => {
                    if self.coupling_terminates_at(id, want, a) {
                        scope.insert(a.clone());
                    }
                }
            }
        }

        for ancestor in self.ancestors(id) {
            for a in self.aspects_reachable_from_ancestor(&ancestor) {
                scope.insert(a);
            }
        }

        scope
    }

    fn coupling_terminates_at(&self, id: &FunctionId, connector: Connector, aspect: &AspectId) -> bool {
        self.couplings.iter().any(|c| {
            &c.to == id && c.to_connector == connector && c.aspects.iter().any(|x| x == aspect)
        })
    }

    /// Resolve a bare identifier to the aspect it names within the
    /// given scope, honoring the owning expression's own aspect (self
    /// reference is always legal, subject to the negative-offset
    /// check enforced by the parser) in addition to the graph scope.
    pub fn resolve<'a>(
        &'a self,
        scope: &HashSet<AspectId>,
        name: &str,
        owner: &AspectId,
    ) -> Option<&'a Aspect> {
        let id = AspectId::new(name);
        if &id == owner {
            return self.aspects.get(owner);
        }
        if scope.contains(&id) {
            self.aspects.get(&id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::normalize_id;

    fn fid(s: &str) -> FunctionId {
        FunctionId(s.to_string())
    }

    fn aid(s: &str) -> AspectId {
        AspectId(normalize_id(s))
    }

    #[test]
    fn scope_includes_incoming_couplings_and_ancestor_outgoing() {
        let mut m = Model::new();
        m.add_function(Function::new(fid("parent"), None));
        m.add_function(Function::new(fid("child"), Some(fid("parent"))));
        m.add_function(Function::new(fid("other"), None));

        m.add_coupling(Coupling {
            from: fid("other"),
            to: fid("child"),
            to_connector: Connector::Input,
            aspects: vec![aid("speed")],
            feedback: false,
        });
        m.add_coupling(Coupling {
            from: fid("parent"),
            to: fid("other"),
            to_connector: Connector::Resource,
            aspects: vec![aid("budget")],
            feedback: false,
        });

        let scope = m.visible_scope(&fid("child"), None);
        assert!(scope.contains(&aid("speed")));
        assert!(scope.contains(&aid("budget")));
    }

    #[test]
    fn narrowed_scope_excludes_aspects_on_other_connectors() {
        let mut m = Model::new();
        m.add_function(Function::new(fid("f"), None));
        m.add_function(Function::new(fid("g"), None));

        m.add_coupling(Coupling {
            from: fid("g"),
            to: fid("f"),
            to_connector: Connector::Input,
            aspects: vec![aid("x")],
            feedback: false,
        });
        m.add_coupling(Coupling {
            from: fid("g"),
            to: fid("f"),
            to_connector: Connector::Control,
            aspects: vec![aid("y")],
            feedback: false,
        });

        let scope = m.visible_scope(&fid("f"), Some(Connector::Input));
        assert!(scope.contains(&aid("x")));
        assert!(!scope.contains(&aid("y")));
    }
}
