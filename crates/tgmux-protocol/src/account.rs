//! Static account configuration and the service dimension a bridge serves.

use serde::{Deserialize, Serialize};

/// One of the four HTTP surfaces a bridge can be dedicated to. Each
/// (account, service) pair gets its own bridge instance so a slow or
/// flood-waited `send_media` bridge never starves `create_chat` traffic on
/// the same account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    CreateChat,
    SendText,
    SendMedia,
    LeaveChat,
}

impl Service {
    pub const ALL: [Service; 4] = [
        Service::CreateChat,
        Service::SendText,
        Service::SendMedia,
        Service::LeaveChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::CreateChat => "create_chat",
            Service::SendText => "send_text",
            Service::SendMedia => "send_media",
            Service::LeaveChat => "leave_chat",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static, config-file-sourced description of one Telegram user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub session_path: String,
    pub api_id: i32,
    pub api_hash: String,
    /// Lower sorts first; the `main` account conventionally carries
    /// priority 0 and receives a guaranteed floor of create_chat traffic.
    pub priority: u32,
    #[serde(default)]
    pub is_main: bool,
}
