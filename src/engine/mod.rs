pub mod core;
mod tests;

pub use self::core::{AccessEngine, MutationOutcome};
