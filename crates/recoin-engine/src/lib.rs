//! Conversation orchestration: thread routing, append coordination,
//! selection tracking, and event fan-out over the store.

pub mod error;
pub mod threads;

pub use error::EngineError;
pub use threads::{SendOutcome, ThreadEngine};
