pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod reply;
pub mod session;
pub mod widget;

pub use client::{DisplayableReply, ExchangeError, MessageExchange, ReplyKind, WebhookClient};
pub use config::{AppearanceConfig, BubblePosition, Profile, WidgetConfig};
pub use envelope::MessageEnvelope;
pub use error::ChatBubbleError;
pub use reply::{ReplyParser, ReplyStrategy};
pub use session::{
    CookieJarStore, LocalStore, MemoryStore, SessionIdentity, SessionStore, StorageError,
};
pub use widget::{ChatWidget, Role, TranscriptEntry};
