// The FRAM model graph: functions (hexagons), their six connectors,
// couplings between them, and the aspects a coupling carries. This is
// the shared IR between whatever editor/file-loader builds the graph
// and the engine that executes it, so it carries the usual
// `Serialize, Deserialize, Clone, Debug` derive set even though
// nothing in this crate reads or writes these types to disk itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One of the six typed connectors on a FRAM function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connector {
    Control,
    Output,
    Resource,
    Precondition,
    Input,
    Time,
}

impl Connector {
    pub fn letter(self) -> char {
        match self {
            Connector::Control => 'C',
            Connector::Output => 'O',
            Connector::Resource => 'R',
            Connector::Precondition => 'P',
            Connector::Input => 'I',
            Connector::Time => 'T',
        }
    }

    pub fn from_letter(c: char) -> Option<Connector> {
        match c.to_ascii_uppercase() {
            'C' => Some(Connector::Control),
            'O' => Some(Connector::Output),
            'R' => Some(Connector::Resource),
            'P' => Some(Connector::Precondition),
            'I' => Some(Connector::Input),
            'T' => Some(Connector::Time),
            _ => None,
        }
    }
}

/// Normalize a user-authored identifier: lowercase, spaces to
/// underscores, apostrophes stripped. Used for both function and
/// aspect identifiers so lookups don't depend on how a name was
/// capitalized or spaced when it was authored.
pub fn normalize_id(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| *c != '\'')
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

/// Case-insensitive aspect identifier; constructed via `normalize_id`
/// so that lookups in scope resolution are just string equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectId(pub String);

impl AspectId {
    pub fn new(raw: &str) -> AspectId {
        AspectId(normalize_id(raw))
    }
}

/// A named quantity carried by a coupling. Owns the index of its
/// `Expression` in the engine's expression table and the function
/// that declared it, but not the expression itself -- expressions are
/// interned separately so the VM can hold `&mut` access to one while
/// reading others during evaluation (see `expr.rs`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aspect {
    pub id: AspectId,
    pub display_name: String,
    pub owner: FunctionId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub String);

/// A FRAM function (hexagonal activity node).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub parent: Option<FunctionId>,
    pub children: Vec<FunctionId>,
    pub notes: Vec<String>,
    /// Aspects attached to an "incoming expression" for a specific
    /// connector letter -- populated only for connectors other than
    /// Output, for scope narrowing per connector.
    pub incoming_expressions: HashMap<Connector, Vec<AspectId>>,
}

impl Function {
    pub fn new(id: FunctionId, parent: Option<FunctionId>) -> Function {
        Function {
            id,
            parent,
            children: Vec::new(),
            notes: Vec::new(),
            incoming_expressions: HashMap::new(),
        }
    }
}

/// A directed coupling from one function's Output connector to
/// another function's non-Output connector, carrying an ordered list
/// of aspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupling {
    pub from: FunctionId,
    pub to: FunctionId,
    pub to_connector: Connector,
    pub aspects: Vec<AspectId>,
    /// Set by the link-builder when this coupling would close a cycle
    /// in the trigger-sequence graph; its source aspect values are
    /// then read from the previous cycle instead of participating in
    /// topological ordering.
    pub feedback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_id_folds_case_space_and_apostrophe() {
        assert_eq!(normalize_id("Driver's Seat"), "drivers_seat");
        assert_eq!(normalize_id("  A B  "), "a_b");
    }

    #[test]
    fn connector_letter_round_trips() {
        for c in [
            Connector::Control,
            Connector::Output,
            Connector::Resource,
            Connector::Precondition,
            Connector::Input,
            Connector::Time,
        ] {
            assert_eq!(Connector::from_letter(c.letter()), Some(c));
        }
    }
}
