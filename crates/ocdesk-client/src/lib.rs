pub mod api;
pub mod backoff;
pub mod error;
pub mod llm;
pub mod sse;
pub mod stream;

pub use api::ApiClient;
pub use backoff::BackoffPolicy;
pub use error::{ClientError, Result};
pub use llm::LlmClient;
pub use stream::{ConnectionState, EventSubscription, StreamClient, StreamConfig};
