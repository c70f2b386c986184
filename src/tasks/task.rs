//! # Unit of work.
//!
//! A [`Task`] is identified by a string id unique within its namespace and
//! carries an opaque payload the coordinator never interprets. The payload
//! travels through the store as-is; schema is the application's business.

/// A unit of work flowing through the coordinator.
///
/// Tasks are cheap to clone and compare by id; the payload is carried along
/// untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    id: String,
    payload: Option<String>,
}

impl Task {
    /// Creates a task with no payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: None,
        }
    }

    /// Creates a task carrying an opaque payload.
    pub fn with_payload(id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload.into()),
        }
    }

    /// The task's identity within the namespace.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The opaque payload, if one was submitted.
    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}
