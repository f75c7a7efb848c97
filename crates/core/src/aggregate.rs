//! Aggregate root traits and optimistic concurrency expectations.

use crate::error::{DomainError, DomainResult};

/// What storage needs to know about an aggregate: its identity and version.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Incremented by one for every applied event. Storage compares it on write
    /// to detect lost updates.
    fn version(&self) -> u64;
}

/// Version the writer saw when it loaded the aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Require the stored aggregate to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        let ExpectedVersion::Exact(expected) = self;
        expected == actual
    }

    /// Fails with [`DomainError::StaleVersion`] when another write got there first.
    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::StaleVersion {
                expected: self,
                actual,
            })
        }
    }
}

/// Pure decide/evolve contract. `handle` validates a command against the
/// current state and returns the resulting events; `apply` folds one event in.
/// Neither may touch IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version per event).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_version_rejects_stale_writes() {
        assert!(ExpectedVersion::Exact(3).matches(3));
        assert!(!ExpectedVersion::Exact(3).matches(4));

        assert_eq!(
            ExpectedVersion::Exact(2).check(5),
            Err(DomainError::StaleVersion {
                expected: ExpectedVersion::Exact(2),
                actual: 5,
            })
        );
    }
}
