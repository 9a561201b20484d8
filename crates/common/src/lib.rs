//! Shared types for the Groq governor workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
