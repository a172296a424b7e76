//! Named maintenance task dispatch.
//!
//! Each adapter owns a [`TaskRegistry`] populated at construction. Dispatch
//! is by exact name; the handler runs synchronously from the caller's point
//! of view but must only *start* long-running backend work and return an
//! acknowledgment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use spanstore_common::{Error, Result};

/// Name of the task every registry answers.
pub const NOOP_TASK: &str = "noop";

/// A maintenance operation exposed by an adapter.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run the task with its opaque parameter string.
    ///
    /// Returns an opaque result payload, typically JSON.
    async fn perform(&self, params: &str) -> Result<String>;
}

/// Handler stored in a [`TaskRegistry`].
#[derive(Clone)]
pub enum TaskHandler {
    /// Accepts any parameters and does nothing.
    Noop,
    /// Delegates to a task implementation.
    Handler(Arc<dyn Task>),
}

impl TaskHandler {
    /// Wrap a task implementation.
    pub fn handler(task: impl Task + 'static) -> Self {
        TaskHandler::Handler(Arc::new(task))
    }

    async fn run(&self, name: &str, params: &str) -> Result<String> {
        match self {
            TaskHandler::Noop => Ok(serde_json::json!({
                "task": name,
                "status": "noop",
            })
            .to_string()),
            TaskHandler::Handler(task) => task.perform(params).await,
        }
    }
}

impl fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskHandler::Noop => f.write_str("Noop"),
            TaskHandler::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Registry mapping task names to handlers.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl TaskRegistry {
    /// Create a registry holding only the [`NOOP_TASK`].
    pub fn new() -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(NOOP_TASK.to_string(), TaskHandler::Noop);
        Self { handlers }
    }

    /// Register a handler.
    ///
    /// # Errors
    /// - `AlreadyExists` if `name` is already registered
    pub fn register(&mut self, name: impl Into<String>, handler: TaskHandler) -> Result<()> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Task '{}' is already registered",
                name
            )));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a task is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Dispatch a task by exact name.
    ///
    /// # Errors
    /// - `UnsupportedAction` if `name` is not registered
    pub async fn perform(&self, name: &str, params: &str) -> Result<String> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::UnsupportedAction(format!("Task '{}' is not supported", name)))?;
        debug!(task = name, "Dispatching task");
        handler.run(name, params).await
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        async fn perform(&self, params: &str) -> Result<String> {
            Ok(format!("echo:{}", params))
        }
    }

    #[tokio::test]
    async fn test_noop_always_registered() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.names(), vec![NOOP_TASK.to_string()]);

        let result = registry.perform(NOOP_TASK, "").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(value["status"], "noop");
    }

    #[tokio::test]
    async fn test_dispatch_by_exact_name() {
        let mut registry = TaskRegistry::new();
        registry.register("echo", TaskHandler::handler(Echo)).unwrap();

        assert_eq!(registry.perform("echo", "hi").await.unwrap(), "echo:hi");
        assert!(matches!(
            registry.perform("Echo", "hi").await,
            Err(Error::UnsupportedAction(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_task_unsupported() {
        let registry = TaskRegistry::default();
        let err = registry.perform("rebuild-index", "{}").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = TaskRegistry::new();
        assert!(registry.register(NOOP_TASK, TaskHandler::Noop).is_err());
    }
}
