use crate::error::Result;
use crate::keys::Keys;
use crate::transaction::{now_unix, WriteTransaction};

/// A per-state-name hook pair maintaining secondary indices on state
/// transitions. Every handler operates exclusively through the supplied
/// write transaction; none performs side effects of its own, so applying
/// and unapplying compose atomically with the primary job-hash update
/// the outer scheduler is making in the same transaction.
pub trait StateHandler: Send + Sync {
    /// The state name this handler fires on, e.g. `"Processing"`.
    fn state_name(&self) -> &'static str;

    /// Called when a job enters this handler's state.
    fn apply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()>;

    /// Called when a job leaves this handler's state.
    fn unapply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()>;
}

/// Maintains the `processing` sorted set.
pub struct ProcessingStateHandler {
    key: String,
}

impl ProcessingStateHandler {
    pub fn new(keys: &Keys) -> Self {
        Self {
            key: keys.processing(),
        }
    }
}

impl StateHandler for ProcessingStateHandler {
    fn state_name(&self) -> &'static str {
        "Processing"
    }

    fn apply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.add_to_set(&self.key, job_id, now_unix() as f64)?;
        Ok(())
    }

    fn unapply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.remove_from_set(&self.key, job_id)?;
        Ok(())
    }
}

/// Maintains the `failed` sorted set.
pub struct FailedStateHandler {
    key: String,
}

impl FailedStateHandler {
    pub fn new(keys: &Keys) -> Self {
        Self { key: keys.failed() }
    }
}

impl StateHandler for FailedStateHandler {
    fn state_name(&self) -> &'static str {
        "Failed"
    }

    fn apply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.add_to_set(&self.key, job_id, now_unix() as f64)?;
        Ok(())
    }

    fn unapply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.remove_from_set(&self.key, job_id)?;
        Ok(())
    }
}

/// Maintains the capped `succeeded` list.
pub struct SucceededStateHandler {
    key: String,
    list_size: usize,
}

impl SucceededStateHandler {
    pub fn new(keys: &Keys, list_size: usize) -> Self {
        Self {
            key: keys.succeeded(),
            list_size,
        }
    }
}

impl StateHandler for SucceededStateHandler {
    fn state_name(&self) -> &'static str {
        "Succeeded"
    }

    fn apply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.insert_to_list(&self.key, job_id)?;
        tx.trim_list(&self.key, 0, self.list_size as isize)?;
        Ok(())
    }

    fn unapply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.remove_from_list(&self.key, job_id)?;
        Ok(())
    }
}

/// Maintains the capped `deleted` list.
pub struct DeletedStateHandler {
    key: String,
    list_size: usize,
}

impl DeletedStateHandler {
    pub fn new(keys: &Keys, list_size: usize) -> Self {
        Self {
            key: keys.deleted(),
            list_size,
        }
    }
}

impl StateHandler for DeletedStateHandler {
    fn state_name(&self) -> &'static str {
        "Deleted"
    }

    fn apply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.insert_to_list(&self.key, job_id)?;
        tx.trim_list(&self.key, 0, self.list_size as isize)?;
        Ok(())
    }

    fn unapply(&self, job_id: &str, tx: &mut WriteTransaction) -> Result<()> {
        tx.remove_from_list(&self.key, job_id)?;
        Ok(())
    }
}

/// The set of handlers the outer scheduler composes into every
/// state-change transaction, indexed by the state name they fire on.
pub struct StateHandlerRegistry {
    handlers: Vec<Box<dyn StateHandler>>,
}

impl StateHandlerRegistry {
    /// The four handlers maintaining the `processing`/`failed`/`succeeded`/`deleted` indices.
    pub fn with_defaults(keys: &Keys, succeeded_list_size: usize, deleted_list_size: usize) -> Self {
        Self {
            handlers: vec![
                Box::new(ProcessingStateHandler::new(keys)),
                Box::new(FailedStateHandler::new(keys)),
                Box::new(SucceededStateHandler::new(keys, succeeded_list_size)),
                Box::new(DeletedStateHandler::new(keys, deleted_list_size)),
            ],
        }
    }

    /// Look up the handler registered for `state_name`, if any.
    pub fn get(&self, state_name: &str) -> Option<&dyn StateHandler> {
        self.handlers
            .iter()
            .find(|h| h.state_name() == state_name)
            .map(|h| h.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::keys::Keys;

    #[test]
    fn registry_resolves_handlers_by_name() {
        let keys = Keys::new(&Config::default());
        let registry = StateHandlerRegistry::with_defaults(&keys, 499, 499);
        assert!(registry.get("Processing").is_some());
        assert!(registry.get("Failed").is_some());
        assert!(registry.get("Succeeded").is_some());
        assert!(registry.get("Deleted").is_some());
        assert!(registry.get("Nonexistent").is_none());
    }

    #[test]
    fn succeeded_handler_queues_insert_and_trim() {
        let keys = Keys::new(&Config::default());
        let handler = SucceededStateHandler::new(&keys, 499);
        let mut tx = WriteTransaction::new(keys);
        handler.apply("job-1", &mut tx).unwrap();
    }
}
