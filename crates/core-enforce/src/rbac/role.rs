//! A single node of the inheritance graph.

use dashmap::DashMap;

/// A role node. Edges are stored by role name so the graph tolerates
/// cycles and concurrent traversal; resolution back to nodes goes
/// through the manager's role table.
#[derive(Debug, Default)]
pub(crate) struct Role {
    name: String,
    /// Ground-truth inheritance targets (from `add_link`)
    pub(crate) explicit: DashMap<String, ()>,
    /// Pattern-induced inheritance targets; regenerated on rebuild and
    /// never iterated by `range`
    pub(crate) derived: DashMap<String, ()>,
    /// Reverse adjacency: names of roles holding any edge to this one
    pub(crate) users: DashMap<String, ()>,
}

impl Role {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Names of all directly inherited roles, explicit and derived
    pub(crate) fn inherits(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .explicit
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for entry in self.derived.iter() {
            if !self.explicit.contains_key(entry.key()) {
                names.push(entry.key().clone());
            }
        }
        names
    }
}
