pub mod optimized;
pub mod predict;

pub use optimized::*;
pub use predict::*;
