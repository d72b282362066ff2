#![warn(missing_docs)]
//! Core library entry points for the confqa knowledge-base assistant.

pub mod answer;
pub mod config;
pub mod embedder;
pub mod fetcher;
pub mod index;
pub mod normalizer;
pub mod pipeline;
pub mod refresh;
pub mod store;

pub use answer::{build_prompt, AnswerModel, GenerationError, OpenAiChat, FALLBACK_ANSWER};
pub use config::Cli;
pub use embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
pub use fetcher::{ConfluenceClient, FetchError, RetryPolicy, WikiSource};
pub use index::{IndexError, SimilarityIndex};
pub use normalizer::{clean_html, CleanOptions};
pub use pipeline::{Answer, Assistant, AssistantSettings};
pub use refresh::RefreshTracker;
pub use store::{EmbeddingStore, Snapshot, StoreError};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
