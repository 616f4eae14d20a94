//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Serial numbers, materials and material costs are entities: two records with
/// the same key are the same thing even if their location or status differ.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
