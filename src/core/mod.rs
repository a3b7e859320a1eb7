pub mod errors;
pub mod lm;
pub mod program;
pub mod signature;

pub use errors::*;
pub use lm::*;
pub use program::*;
pub use signature::*;
