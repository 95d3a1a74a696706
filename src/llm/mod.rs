//! Model provider client.
//!
//! [`CompletionBackend`] is the seam the analysis layer depends on;
//! [`GeminiClient`] implements it over the Gemini REST API.

mod client;
mod types;

#[cfg(test)]
pub use client::MockCompletionBackend;
pub use client::{CompletionBackend, GeminiClient};
pub use types::*;
