pub mod chat_adapter;

pub use chat_adapter::*;
