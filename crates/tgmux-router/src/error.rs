use thiserror::Error;

use tgmux_bridge::BridgeError;
use tgmux_store::StoreError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no healthy bridge available for service {service}")]
    PoolEmpty { service: String },

    #[error("chat {chat_id} has no assigned account and no bridges are available")]
    NoAccountForChat { chat_id: String },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
