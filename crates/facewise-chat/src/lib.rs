//! facewise-chat: questions about registered faces, answered by a chat
//! model over documents retrieved from the face store.

pub mod document;
pub mod index;
pub mod llm;
pub mod openai;
pub mod retry;
pub mod service;
pub mod session;

pub use document::Document;
pub use index::VectorIndex;
pub use llm::{ChatModel, Embedder, LlmError};
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;
pub use service::{ChatRag, LoadStatus, QueryIntent};
