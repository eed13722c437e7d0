//! Ambient, swappable UTC clock.
//!
//! All due-time math in the subsystem goes through [`utc_now`]. By default it
//! reads the system clock; a [`ClockScope`] pushes an override onto a
//! thread-local stack so tests and replay tooling can pin or shift time.
//! Scopes must unwind in stack order (the guard pops its own frame on drop).

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};

enum Source {
    Fixed(Cell<DateTime<Utc>>),
    Offset(Duration),
}

thread_local! {
    static SOURCES: RefCell<Vec<Rc<Source>>> = const { RefCell::new(Vec::new()) };
}

/// The current UTC instant, as seen through any active clock scopes.
///
/// Frames apply bottom-to-top: a fixed frame replaces the instant, an offset
/// frame shifts whatever the frames below it produce.
pub fn utc_now() -> DateTime<Utc> {
    SOURCES.with(|sources| {
        let stack = sources.borrow();
        let mut now = Utc::now();
        for source in stack.iter() {
            match &**source {
                Source::Fixed(instant) => now = instant.get(),
                Source::Offset(delta) => now += *delta,
            }
        }
        now
    })
}

/// RAII guard for an ambient clock override.
///
/// ```
/// use pact_core::clock::{self, ClockScope};
/// use chrono::{TimeZone, Utc};
///
/// let scope = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
/// assert_eq!(clock::utc_now(), Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
/// scope.advance(chrono::Duration::seconds(60));
/// assert_eq!(clock::utc_now(), Utc.with_ymd_and_hms(2024, 6, 1, 12, 1, 0).unwrap());
/// ```
pub struct ClockScope {
    source: Rc<Source>,
}

impl ClockScope {
    /// Pin the clock to a fixed instant.
    pub fn fixed(instant: DateTime<Utc>) -> Self {
        Self::push(Source::Fixed(Cell::new(instant)))
    }

    /// Shift the clock by a constant offset.
    pub fn offset(delta: Duration) -> Self {
        Self::push(Source::Offset(delta))
    }

    /// Move a fixed clock forward (or backward, with a negative duration).
    ///
    /// # Panics
    ///
    /// Panics when called on an offset scope.
    pub fn advance(&self, delta: Duration) {
        match &*self.source {
            Source::Fixed(instant) => instant.set(instant.get() + delta),
            Source::Offset(_) => panic!("advance requires a fixed clock scope"),
        }
    }

    /// Re-pin a fixed clock to a new instant.
    ///
    /// # Panics
    ///
    /// Panics when called on an offset scope.
    pub fn set(&self, instant: DateTime<Utc>) {
        match &*self.source {
            Source::Fixed(cell) => cell.set(instant),
            Source::Offset(_) => panic!("set requires a fixed clock scope"),
        }
    }

    fn push(source: Source) -> Self {
        let source = Rc::new(source);
        SOURCES.with(|sources| sources.borrow_mut().push(Rc::clone(&source)));
        Self { source }
    }
}

impl Drop for ClockScope {
    fn drop(&mut self) {
        SOURCES.with(|sources| {
            let popped = sources.borrow_mut().pop();
            debug_assert!(
                popped.is_some_and(|top| Rc::ptr_eq(&top, &self.source)),
                "clock scopes must unwind in stack order"
            );
        });
    }
}
