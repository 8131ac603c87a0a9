use std::collections::BTreeMap;

/// One end of a patch cable: an accessor on another instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    pub instance: i32,
    pub member: String,
}

impl ConnectionTarget {
    pub fn new(instance: i32, member: impl Into<String>) -> Self {
        Self {
            instance,
            member: member.into(),
        }
    }
}

/// Outgoing patch cables of a single instance, keyed by source accessor.
///
/// A source never maps to an empty target list, and a target appears at most
/// once per source.
#[derive(Debug, Clone, Default)]
pub struct Connections {
    edges: BTreeMap<String, Vec<ConnectionTarget>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge. Returns `false` if it already existed.
    pub fn connect(&mut self, source: &str, target: ConnectionTarget) -> bool {
        let targets = self.edges.entry(source.to_string()).or_default();
        if targets.contains(&target) {
            return false;
        }
        targets.push(target);
        true
    }

    /// Removes an edge, dropping the source key once it has no targets left.
    pub fn disconnect(&mut self, source: &str, target: &ConnectionTarget) -> bool {
        let Some(targets) = self.edges.get_mut(source) else {
            return false;
        };
        let Some(index) = targets.iter().position(|t| t == target) else {
            return false;
        };
        targets.remove(index);
        if targets.is_empty() {
            self.edges.remove(source);
        }
        true
    }

    /// Keeps only the targets for which `keep` holds.
    pub fn retain_targets<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&ConnectionTarget) -> bool,
    {
        let mut removed = 0;
        self.edges.retain(|_, targets| {
            let before = targets.len();
            targets.retain(|target| keep(target));
            removed += before - targets.len();
            !targets.is_empty()
        });
        removed
    }

    pub fn targets(&self, source: &str) -> &[ConnectionTarget] {
        self.edges.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ConnectionTarget])> {
        self.edges
            .iter()
            .map(|(source, targets)| (source.as_str(), targets.as_slice()))
    }

    /// Number of source accessors with at least one target.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
