pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod model;
pub mod notify;
pub mod render;
pub mod services;
pub mod stats;
pub mod store;

#[cfg(test)]
mod testing;

pub use crate::engine::Engine;
pub use crate::error::{Error, Result};
