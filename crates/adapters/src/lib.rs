//! Backend adapters.
//!
//! Adapters are pure translators between DomeKit messages and a backend
//! wire protocol. They perform no policy checks and no audit writes.

pub mod embedding;
pub mod ollama;

pub use embedding::OllamaEmbedding;
pub use ollama::OllamaAdapter;
