//! Embedding backends behind one capability interface.

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

use anyhow::Result;

/// Maps batches of text to fixed-dimension vectors.
///
/// The same implementation must embed both the corpus and the query; mixing
/// models invalidates similarity scores. Implementations return raw model
/// output with no normalization applied.
pub trait Embedder: Send + Sync {
    /// Embeds every input text, preserving order. All-or-nothing: a failed
    /// batch returns an error rather than partial output.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
