//! Orchestrator Core
//!
//! Foundational types for the inference orchestrator workspace. This crate
//! depends on nothing else in the workspace and carries no backend code.
//!
//! ## Module Organization
//!
//! - `error` - Error taxonomy (`CoreError`, `CoreResult`)
//! - `message` - Role-tagged chat messages
//! - `conversation` - Session-keyed history and the `ConversationStore` interface
//! - `transport` - Outbound client frames and the `TransportSink` interface
//! - `streaming` - Stream event types and adapter trait

pub mod conversation;
pub mod error;
pub mod message;
pub mod streaming;
pub mod transport;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Messages & Conversations ───────────────────────────────────────────
pub use conversation::{Conversation, ConversationStore, InMemoryConversationStore};
pub use message::{Message, MessageRole};

// ── Transport ──────────────────────────────────────────────────────────
pub use transport::{ChannelSink, SinkMessage, SinkMessageKind, TransportSink, DONE_SENTINEL};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, StreamEvent};
