//! Response scoring and best-response selection.

pub mod scorer;
mod selector;

pub use scorer::quality;
pub use selector::{combined_score, speed_score, EnsembleDecision, EnsembleSelector, NO_WINNER};
