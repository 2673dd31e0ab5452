//! # llmgate Core Library
//!
//! Domain types shared by the gateway and its hosts.
//!
//! ## Modules
//!
//! - `settings` - Validated settings handed over by the settings collaborator
//! - `provider` - Provider selection inputs (kind, base URL, key, model mapping)
//! - `chat` - Provider-agnostic chat-completion payloads and the in-band error event
//!
//! Nothing in this crate talks to the network; the gateway crate owns all I/O.

pub mod chat;
pub mod provider;
pub mod settings;

pub use chat::{ChatCompletionChunk, ChatCompletionRequest, ChatMessage, ErrorEvent};
pub use provider::{Model, ProviderKind, ProviderSettings};
pub use settings::{Secret, Settings, SettingsError, DEFAULT_TOKEN_EXCHANGE_URL};
