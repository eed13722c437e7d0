//! The explicit action registry.
//!
//! Fulfillment handlers register under a stable action name at process
//! start; the built registry is immutable afterwards. Action names are
//! stored inside promises, so a name must never be renamed once any promise
//! carrying it may still exist.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use pact_core::{Error, Result};

use crate::entity::Promise;

/// One registered fulfillment action.
///
/// Implementations must be idempotent: the subsystem guarantees at-least-once
/// execution, so an action may run more than once for the same promise.
#[async_trait]
pub trait FulfillmentHandler: Send + Sync {
    /// Run the action for one promise.
    async fn fulfill(&self, promise: &Promise, ct: &CancellationToken) -> Result<()>;
}

/// Builder collecting `(action name, handler)` pairs at startup.
#[derive(Default)]
pub struct FulfillmentRegistryBuilder {
    handlers: HashMap<String, Arc<dyn FulfillmentHandler>>,
}

impl std::fmt::Debug for FulfillmentRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentRegistryBuilder")
            .field("action_names", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FulfillmentRegistryBuilder {
    /// Register a handler under its stable action name.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the name is already taken -- action names are
    /// unique by contract.
    pub fn register(
        mut self,
        action_name: impl Into<String>,
        handler: Arc<dyn FulfillmentHandler>,
    ) -> Result<Self> {
        let action_name = action_name.into();
        if self.handlers.contains_key(&action_name) {
            return Err(Error::invalid_state(format!(
                "action {action_name:?} is already registered"
            )));
        }
        self.handlers.insert(action_name, handler);
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> FulfillmentRegistry {
        FulfillmentRegistry { handlers: Arc::new(self.handlers) }
    }
}

/// Immutable name-to-handler map. Cheap to clone.
#[derive(Clone, Default)]
pub struct FulfillmentRegistry {
    handlers: Arc<HashMap<String, Arc<dyn FulfillmentHandler>>>,
}

impl FulfillmentRegistry {
    /// Start collecting registrations.
    pub fn builder() -> FulfillmentRegistryBuilder {
        FulfillmentRegistryBuilder::default()
    }

    /// The handler for an action name.
    pub fn get(&self, action_name: &str) -> Option<Arc<dyn FulfillmentHandler>> {
        self.handlers.get(action_name).cloned()
    }

    /// `true` when a handler is registered under the name.
    pub fn contains(&self, action_name: &str) -> bool {
        self.handlers.contains_key(action_name)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered action names, unordered.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for FulfillmentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentRegistry")
            .field("count", &self.handlers.len())
            .field("actions", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
