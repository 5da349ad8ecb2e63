use crate::membership::types::Node;
use crate::registry::types::TaskEntry;

use anyhow::Result;

/// Policy choosing which execution node should run a given task.
///
/// A single-method abstraction so alternative policies (least-loaded,
/// affinity, resource matching) can be substituted without touching the
/// scheduler. Candidates are the alive runtime members at call time.
pub trait RuntimeSelector: Send + Sync {
    fn select(&self, entry: &TaskEntry, candidates: &[Node]) -> Result<Node>;
}

/// Default policy: uniform-random choice over all candidates.
pub struct UniformRandomSelector;

impl RuntimeSelector for UniformRandomSelector {
    fn select(&self, entry: &TaskEntry, candidates: &[Node]) -> Result<Node> {
        if candidates.is_empty() {
            return Err(anyhow::anyhow!("no runtime found for task {}", entry.id));
        }

        use rand::Rng;
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[idx].clone())
    }
}
