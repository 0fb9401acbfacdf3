//! Chat client: HTTP/WebSocket access to the server plus the display model
//! of open conversations.

pub mod client;
pub mod error;
pub mod inbox;
pub mod transcript;

pub use client::{ChatClient, ClientEvent};
pub use error::ClientError;
pub use inbox::{Inbox, InboxUpdate, Notification};
pub use transcript::{DisplayBlock, PushOutcome, Side, Transcript};
