//! Promise creation against the registered action set.

use pact_core::{scope, Error, Result};
use pact_store::StoredEntity;

use crate::entity::Promise;
use crate::registry::FulfillmentRegistry;

/// Creates promises for registered actions.
///
/// Creation is purely in-memory; the promise becomes authoritative when its
/// transaction commits. Cheap to clone.
#[derive(Clone)]
pub struct PromiseFactory {
    registry: FulfillmentRegistry,
}

impl PromiseFactory {
    /// A factory over the frozen registry.
    pub fn new(registry: FulfillmentRegistry) -> Self {
        Self { registry }
    }

    /// A promise for `action_name` in a fresh ambient-scoped partition.
    ///
    /// # Errors
    ///
    /// `InvalidState` when no handler is registered under `action_name`;
    /// unknown actions would never fulfill.
    pub fn create(&self, action_name: &str, data: impl Into<String>) -> Result<Promise> {
        self.ensure_registered(action_name)?;
        Ok(Promise::new(scope::new_id(), action_name, data))
    }

    /// A promise co-located with an entity: the id is generated in the
    /// entity's partition so both fit one transaction.
    pub fn create_for_entity(
        &self,
        entity: &dyn StoredEntity,
        action_name: &str,
        data: impl Into<String>,
    ) -> Result<Promise> {
        self.ensure_registered(action_name)?;
        let id = scope::new_id_in_partition(&entity.partition_key())?;
        Ok(Promise::new(id, action_name, data))
    }

    fn ensure_registered(&self, action_name: &str) -> Result<()> {
        if !self.registry.contains(action_name) {
            return Err(Error::invalid_state(format!(
                "no fulfillment handler is registered for action {action_name:?}"
            )));
        }
        Ok(())
    }
}
