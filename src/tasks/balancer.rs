//! # Claim-admission policy.
//!
//! Before attempting a claim, the consumer asks its [`Balancer`] whether it
//! should compete for the task at all. Policies see the candidate id and a
//! snapshot of the tasks this node is already running; anything fancier
//! (cluster-wide load, labels, quotas) lives behind this seam.

/// Pluggable policy deciding whether to attempt a claim.
pub trait Balancer: Send + Sync + 'static {
    /// Returns `true` if this node should try to claim `task_id`.
    ///
    /// `running` is a snapshot of the task ids currently handled by this
    /// node. Returning `false` skips the claim; the task stays available to
    /// other nodes (and to this node on a later watch event).
    fn can_claim(&self, task_id: &str, running: &[String]) -> bool;
}

/// Trivial balancer that competes for every task.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClaimAll;

impl Balancer for ClaimAll {
    fn can_claim(&self, _task_id: &str, _running: &[String]) -> bool {
        true
    }
}

/// Caps the number of concurrently running tasks on this node.
#[derive(Clone, Copy, Debug)]
pub struct MaxTasks(pub usize);

impl Balancer for MaxTasks {
    fn can_claim(&self, _task_id: &str, running: &[String]) -> bool {
        running.len() < self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_all_always_claims() {
        let running = vec!["a".to_string(), "b".to_string()];
        assert!(ClaimAll.can_claim("c", &running));
    }

    #[test]
    fn max_tasks_stops_at_cap() {
        let running = vec!["a".to_string(), "b".to_string()];
        assert!(MaxTasks(3).can_claim("c", &running));
        assert!(!MaxTasks(2).can_claim("c", &running));
    }
}
