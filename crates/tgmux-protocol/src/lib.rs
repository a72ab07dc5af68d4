//! Telegram protocol contract: entity model, account/service types, error
//! classification, and the [`session::TelegramSession`] trait the bridge
//! layer drives.

pub mod account;
pub mod entity;
pub mod error;
pub mod session;

pub use account::{AccountConfig, Service};
pub use entity::{ChatRef, Entity, normalize_chat_id, normalize_chat_ref};
pub use error::{ProtocolError, Result};
pub use session::{AdminRightsTier, CreatedChat, MediaUpload, SendTextOptions, SentMessage, TelegramSession};
