pub mod command;
pub mod schedule;

pub use command::{SwapCommand, SwapHandler, SwapKind, SwapOutcome, SwapState, SwapToken};
