//! Module implement the delta-chain store.
//!
//! Both content blobs and serialized rosters are kept with the same
//! mechanism: a `bases` relation holding full serialized versions and a
//! `deltas` relation holding compact edit scripts, `deltas(id, base)`
//! meaning `id` can be rebuilt by applying the delta to `base`. To
//! materialize an identifier the store searches breadth-first through
//! the delta relation until it reaches a base, then applies the deltas
//! in reverse order, refer [get_reconstruction_path]. Every reachable
//! identifier terminates at a base, anything else is a corrupt store.
//!
//! Which direction deltas are written on [ContentStore::put_file_version]
//! is governed by the `delta-direction` database variable, refer
//! [DeltaDirection].

use std::collections::{HashMap, VecDeque};

use crate::{hash::Hash, Monitor, Result};

pub mod content;
pub mod lru;
pub mod rosters;
pub mod xdelta;

pub use content::ContentStore;
pub use lru::Lru;
pub use rosters::RosterStore;

/// Database-wide policy for [ContentStore::put_file_version].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeltaDirection {
    /// Store the new version as a base and keep the old reachable
    /// through a reverse delta. The default.
    Reverse,
    /// Keep the old base and make the new version reachable through a
    /// forward delta.
    Forward,
    /// Store both delta rows.
    Both,
}

impl DeltaDirection {
    /// Read the policy from the `database/delta-direction` variable.
    /// Unset means [DeltaDirection::Reverse]; a malformed value warns
    /// and falls back to [DeltaDirection::Reverse].
    pub fn from_var(value: Option<String>, monitor: &mut dyn Monitor) -> DeltaDirection {
        match value.as_deref() {
            None | Some("reverse") => DeltaDirection::Reverse,
            Some("forward") => DeltaDirection::Forward,
            Some("both") => DeltaDirection::Both,
            Some(value) => {
                monitor.warn(format!(
                    "unknown delta direction '{}'; assuming 'reverse'. Valid \
                     values are 'reverse', 'forward', 'both'.",
                    value
                ));
                DeltaDirection::Reverse
            }
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, DeltaDirection::Reverse | DeltaDirection::Both)
    }

    pub fn is_forward(&self) -> bool {
        matches!(self, DeltaDirection::Forward | DeltaDirection::Both)
    }
}

/// One store's view of its delta relation, driving the breadth-first
/// search for a base.
pub trait ReconstructionGraph {
    /// Whether `node` is available in full, either as a base row or in
    /// a cache.
    fn is_base(&self, node: &Hash) -> Result<bool>;

    /// All bases `node` has a delta row against.
    fn nexts(&self, node: &Hash) -> Result<Vec<Hash>>;
}

/// Search breadth-first from `start` through the delta relation until a
/// base is found. Return the path `[start, .., base]`; fail with
/// `Corrupt` when no chain terminates.
pub fn get_reconstruction_path(
    start: Hash,
    graph: &impl ReconstructionGraph,
) -> Result<Vec<Hash>> {
    let mut frontier = VecDeque::new();
    let mut parents: HashMap<Hash, Hash> = HashMap::new();

    frontier.push_back(start);
    parents.insert(start, start);

    while let Some(curr) = frontier.pop_front() {
        if graph.is_base(&curr)? {
            let mut path = vec![curr];
            let mut node = curr;
            while node != start {
                node = parents[&node];
                path.push(node);
            }
            path.reverse();
            return Ok(path);
        }
        for next in graph.nexts(&curr)? {
            parents.entry(next).or_insert_with(|| {
                frontier.push_back(next);
                curr
            });
        }
    }

    err_at!(Corrupt, msg: "no base reachable from {}", start)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
