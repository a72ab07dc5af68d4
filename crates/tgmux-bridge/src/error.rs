use thiserror::Error;
use tgmux_protocol::ProtocolError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge {name} is not healthy: {status}")]
    Unhealthy { name: String, status: String },

    #[error("bridge {name} is flood-waited for another {remaining_secs}s")]
    FloodWaited { name: String, remaining_secs: u32 },

    #[error("bridge {name} is banned")]
    Banned { name: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no healthy accounts available")]
    NoHealthyAccounts,

    #[error("chat {chat_id} has no assigned account and no accounts are available")]
    NoAccountForChat { chat_id: String },

    #[error("account {name} not found in pool")]
    AccountNotFound { name: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;
