//! Aggregate root traits for the document domain.

/// Aggregate root marker + minimal interface.
///
/// Aggregates own their state transitions. Storage, locking and publication are
/// handled by the infra layer, which rehydrates an aggregate, asks it to decide,
/// applies the resulting events and persists the new state.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    fn version(&self) -> u64;
}

/// Decide/apply split used by every aggregate.
///
/// - `handle(&self, cmd)` validates a command against current state and returns
///   the events it produces, without mutating anything.
/// - `apply(&mut self, event)` evolves state and bumps `version()` by one.
///
/// Both must stay free of IO.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Handle a command and apply the resulting events in one step.
    fn execute(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let events = self.handle(command)?;
        for event in &events {
            self.apply(event);
        }
        Ok(events)
    }
}

