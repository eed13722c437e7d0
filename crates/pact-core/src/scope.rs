//! Ambient identifier-generation scopes.
//!
//! [`new_id`] consults a thread-local stack of scope frames: a frame may
//! replace the generator (tests install [`IncrementalIdGenerator`]) and/or
//! pin every generated id to one partition. Frames nest and must unwind in
//! stack order; the guard pops its own frame on drop.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::id::{Id, IdGenerator, IncrementalIdGenerator, TimeOrderedIdGenerator};
use crate::partition::PartitionKey;

static DEFAULT_GENERATOR: Lazy<Arc<dyn IdGenerator>> =
    Lazy::new(|| Arc::new(TimeOrderedIdGenerator));

struct Frame {
    generator: Option<Arc<dyn IdGenerator>>,
    partition: Option<PartitionKey>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// RAII guard for an ambient id scope.
pub struct IdScope {
    _private: (),
}

impl IdScope {
    /// Replace the ambient generator for the lifetime of the scope.
    pub fn with_generator(generator: Arc<dyn IdGenerator>) -> Self {
        Self::push(Frame { generator: Some(generator), partition: None })
    }

    /// Pin every id generated inside the scope to one partition.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the key cannot serve as an id suffix (it must be
    /// exactly three alphanumeric characters).
    pub fn in_partition(partition: PartitionKey) -> Result<Self> {
        ensure_suffix(&partition)?;
        Ok(Self::push(Frame { generator: None, partition: Some(partition) }))
    }

    /// Deterministic test scope: incremental generator pinned to one
    /// partition.
    pub fn incremental_in_partition(partition: PartitionKey) -> Result<Self> {
        ensure_suffix(&partition)?;
        Ok(Self::push(Frame {
            generator: Some(Arc::new(IncrementalIdGenerator::new())),
            partition: Some(partition),
        }))
    }

    fn push(frame: Frame) -> Self {
        FRAMES.with(|frames| frames.borrow_mut().push(frame));
        Self { _private: () }
    }
}

impl Drop for IdScope {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            let popped = frames.borrow_mut().pop();
            debug_assert!(popped.is_some(), "id scopes must unwind in stack order");
        });
    }
}

/// Generate a fresh identifier through the ambient scope stack.
pub fn new_id() -> Id {
    let (generator, partition) = effective();
    let id = generator.next();
    match partition {
        Some(pk) => id.with_partition_suffix(pk.value()),
        None => id,
    }
}

/// Generate a fresh identifier in a specific partition, overriding any
/// ambient pin.
///
/// # Errors
///
/// `InvalidState` when the key cannot serve as an id suffix.
pub fn new_id_in_partition(partition: &PartitionKey) -> Result<Id> {
    ensure_suffix(partition)?;
    let (generator, _) = effective();
    Ok(generator.next().with_partition_suffix(partition.value()))
}

fn ensure_suffix(partition: &PartitionKey) -> Result<()> {
    if !partition.is_id_suffix() {
        return Err(Error::invalid_state(format!(
            "partition key {:?} cannot be used as an id suffix",
            partition.value()
        )));
    }
    Ok(())
}

fn effective() -> (Arc<dyn IdGenerator>, Option<PartitionKey>) {
    FRAMES.with(|frames| {
        let stack = frames.borrow();
        let generator = stack
            .iter()
            .rev()
            .find_map(|frame| frame.generator.clone())
            .unwrap_or_else(|| Arc::clone(&DEFAULT_GENERATOR));
        let partition = stack.iter().rev().find_map(|frame| frame.partition.clone());
        (generator, partition)
    })
}
