//! Core data model: identifiers, entities, and their invariants (§3).

pub mod budget;
pub mod claim;
pub mod conflict;
pub mod ids;
pub mod merge_event;
pub mod session;
pub mod suggestion;

pub use ids::ValidationError;
