//! # Namespace layout.
//!
//! ```text
//! <namespace>/
//!   tasks/
//!     <taskID>/            # one directory per task
//!       props              # opaque payload (optional)
//!       owner              # {"node":"<name>"}, TTL = claim_ttl
//!   nodes/
//!     <nodeName>/          # liveness directory, TTL = node_ttl
//! ```
//!
//! [`Paths`] joins keys within a normalized namespace; [`TaskKey`]
//! classifies watch-event paths back into task-level meaning.

/// Subtree holding one directory per task.
pub const TASKS_PATH: &str = "tasks";

/// Subtree holding one liveness directory per node.
pub const NODES_PATH: &str = "nodes";

/// Leaf under a task directory whose existence denotes ownership.
pub const OWNER_MARKER: &str = "owner";

/// Leaf under a task directory carrying the opaque payload.
pub const PROPS_KEY: &str = "props";

/// Key builder for one namespace.
#[derive(Clone, Debug)]
pub(crate) struct Paths {
    namespace: String,
}

impl Paths {
    /// Normalizes `namespace` to `/<ns>` form (leading slash, no trailing
    /// slash) and returns a builder for it.
    pub fn new(namespace: &str) -> Self {
        let trimmed = namespace.trim_matches('/');
        Self {
            namespace: format!("/{trimmed}"),
        }
    }

    pub fn tasks(&self) -> String {
        format!("{}/{TASKS_PATH}", self.namespace)
    }

    pub fn nodes(&self) -> String {
        format!("{}/{NODES_PATH}", self.namespace)
    }

    pub fn task(&self, id: &str) -> String {
        format!("{}/{id}", self.tasks())
    }

    pub fn owner(&self, id: &str) -> String {
        format!("{}/{OWNER_MARKER}", self.task(id))
    }

    pub fn props(&self, id: &str) -> String {
        format!("{}/{PROPS_KEY}", self.task(id))
    }

    pub fn node(&self, name: &str) -> String {
        format!("{}/{name}", self.nodes())
    }

    /// Classifies an absolute key under the tasks subtree.
    ///
    /// Returns `None` for keys outside `tasks/`.
    pub fn classify(&self, key: &str) -> Option<TaskKey> {
        let prefix = self.tasks();
        let rest = key.strip_prefix(prefix.as_str())?.strip_prefix('/')?;

        let mut segments = rest.split('/');
        let id = segments.next().filter(|s| !s.is_empty())?.to_string();

        match segments.next() {
            None => Some(TaskKey::Dir(id)),
            Some(OWNER_MARKER) if segments.next().is_none() => Some(TaskKey::Owner(id)),
            Some(PROPS_KEY) if segments.next().is_none() => Some(TaskKey::Props(id)),
            Some(_) => Some(TaskKey::Other(id)),
        }
    }

}

/// Task-level meaning of a key under `tasks/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TaskKey {
    /// The task directory itself.
    Dir(String),
    /// The task's owner marker.
    Owner(String),
    /// The task's payload leaf.
    Props(String),
    /// Any other leaf below the task (application keys).
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_is_normalized() {
        for raw in ["grid", "/grid", "grid/", "/grid/"] {
            assert_eq!(Paths::new(raw).tasks(), "/grid/tasks");
        }
    }

    #[test]
    fn classify_task_keys() {
        let p = Paths::new("/grid");

        assert_eq!(
            p.classify("/grid/tasks/t1"),
            Some(TaskKey::Dir("t1".into()))
        );
        assert_eq!(
            p.classify("/grid/tasks/t1/owner"),
            Some(TaskKey::Owner("t1".into()))
        );
        assert_eq!(
            p.classify("/grid/tasks/t1/props"),
            Some(TaskKey::Props("t1".into()))
        );
        assert_eq!(
            p.classify("/grid/tasks/t1/extra"),
            Some(TaskKey::Other("t1".into()))
        );
        assert_eq!(p.classify("/grid/nodes/n1"), None);
        assert_eq!(p.classify("/grid/tasks"), None);
    }

    #[test]
    fn markers_below_a_subdir_are_not_markers() {
        let p = Paths::new("/grid");
        assert_eq!(
            p.classify("/grid/tasks/t1/sub/owner"),
            Some(TaskKey::Other("t1".into()))
        );
        assert_eq!(
            p.classify("/grid/tasks/t1/sub/props"),
            Some(TaskKey::Other("t1".into()))
        );
    }
}
