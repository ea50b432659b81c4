pub mod agent;
pub mod prediction;

pub use agent::*;
pub use prediction::*;
