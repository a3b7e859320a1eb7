pub mod demo;
pub mod example;
pub mod prediction;

pub use demo::*;
pub use example::*;
pub use prediction::*;
