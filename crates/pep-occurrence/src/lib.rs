//! The Occurrence Manager — spec.md §4.4.
//!
//! [`transition`] is the pure state machine; [`manager`] wraps it with the
//! DB transaction and post-commit hub publish; [`sweeper`] is the
//! background task that auto-cancels expired occurrences.

pub mod manager;
pub mod sweeper;
pub mod transition;

pub use manager::{OccurrenceManager, TransitionOutcome};
pub use sweeper::spawn_sweeper;
pub use transition::TransitionError;
