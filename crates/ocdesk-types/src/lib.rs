//! Wire model for the OpenCode HTTP/SSE API.
//!
//! Messages and parts are discriminated unions (`role` and `type`). They are
//! decoded in two passes so an unknown discriminator is reported by name
//! instead of as a generic shape mismatch; see [`decode`].

pub mod chat;
pub mod config;
pub mod decode;
pub mod event;
pub mod file;
pub mod llm;
pub mod message;
pub mod part;
pub mod session;
pub mod transcript;

pub use chat::{ChatInput, ModelSelection, TextInputPart};
pub use config::{Agent, AgentConfig, Model, ModelLimit, Provider, ProvidersResponse, ServerConfig};
pub use decode::{DecodeError, PartDecodeMode};
pub use event::{Envelope, ServerEvent};
pub use file::{FileContent, Position, Range, SearchResult, Symbol};
pub use llm::{PolishTextRequest, PolishTextResponse};
pub use message::{AssistantMessage, Message, MessageWithParts, Role, UserMessage};
pub use part::{OpaquePart, Part, ReasoningPart, TextPart, ToolPart, ToolState};
pub use session::{CreateSessionRequest, Session, UpdateSessionRequest, DEFAULT_SESSION_TITLE};
pub use transcript::{Transcript, TranscriptChange};
