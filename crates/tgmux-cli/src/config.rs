//! Configuration surface: environment variables plus a TOML accounts table.
//!
//! Follows the teacher's `bot_config.rs` pattern of falling back to
//! defaults on a missing file rather than failing startup, and its
//! `helpers::env_non_empty` idiom for "treat an empty env var as unset"
//! env lookups.

use std::path::Path;

use serde::Deserialize;
use tgmux_protocol::{AccountConfig, Service};

const DEFAULT_CREATE_SEND_TIMEOUT_SECS: u64 = 150;
const DEFAULT_LEAVE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub registry_db: String,
    pub monitor_user: String,
    pub monitor_pass: String,
    pub log_level: String,
    pub salebot_callback_url: Option<String>,
    pub salebot_group_id: Option<String>,
    pub bot_token: Option<String>,
    pub amo_observer_username: Option<String>,
    pub create_send_timeout_secs: u64,
    pub leave_timeout_secs: u64,
    /// One entry per (account, service) pair, already expanded from the
    /// accounts file's per-service session mapping.
    pub bridges: Vec<(AccountConfig, Service)>,
}

/// `accounts.toml` shape: one `[[account]]` table per Telegram user account,
/// each carrying a `sessions` map from service name to `.session` file.
/// Flattened at load time into one `(AccountConfig, Service)` pair per
/// service, since a bridge only ever holds one session file.
#[derive(Debug, Deserialize)]
struct AccountsFile {
    #[serde(rename = "account")]
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    name: String,
    api_id: i32,
    api_hash: String,
    priority: u32,
    #[serde(default)]
    is_main: bool,
    /// Phone/username kept for human reference in the dashboard; not
    /// consumed by the pool itself.
    #[serde(default)]
    #[allow(dead_code)]
    phone: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    username: Option<String>,
    sessions: std::collections::HashMap<String, String>,
}

/// Read an environment variable, treating an empty string the same as an
/// unset one — following `openintent-cli::helpers::env_non_empty`.
pub fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_non_empty(key).unwrap_or_else(|| default.to_string())
}

fn env_u64_or(key: &str, default: u64) -> u64 {
    env_non_empty(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl GatewayConfig {
    /// Load `.env` (if present), then environment variables, then the
    /// accounts TOML file named by `ACCOUNTS_FILE` (default
    /// `accounts.toml`), following `dotenvy::dotenv().ok()` +
    /// `std::env::var` lookups the way `openintent-cli` resolves its own
    /// config.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let accounts_path = env_or("ACCOUNTS_FILE", "accounts.toml");
        let bridges = load_accounts(Path::new(&accounts_path))?;

        Ok(Self {
            registry_db: env_or("REGISTRY_DB", "chat_registry.db"),
            monitor_user: env_or("MONITOR_USER", "admin"),
            monitor_pass: env_or("MONITOR_PASS", "admin"),
            log_level: env_or("LOG_LEVEL", "info"),
            salebot_callback_url: env_non_empty("SALEBOT_CALLBACK_URL"),
            salebot_group_id: env_non_empty("SALEBOT_GROUP_ID"),
            bot_token: env_non_empty("BOT_TOKEN"),
            amo_observer_username: env_non_empty("AMO_OBSERVER_USERNAME"),
            create_send_timeout_secs: env_u64_or("CREATE_SEND_TIMEOUT_SECS", DEFAULT_CREATE_SEND_TIMEOUT_SECS),
            leave_timeout_secs: env_u64_or("LEAVE_TIMEOUT_SECS", DEFAULT_LEAVE_TIMEOUT_SECS),
            bridges,
        })
    }

    pub fn to_web_config(&self) -> tgmux_web::GatewayConfig {
        tgmux_web::GatewayConfig {
            monitor_user: self.monitor_user.clone(),
            monitor_pass: self.monitor_pass.clone(),
            salebot_callback_url: self.salebot_callback_url.clone(),
            salebot_group_id: self.salebot_group_id.clone(),
            amo_observer_username: self.amo_observer_username.clone(),
            create_send_timeout_secs: self.create_send_timeout_secs,
            leave_timeout_secs: self.leave_timeout_secs,
        }
    }
}

/// `api_id`/`api_hash` shared by every account via `TG_API_ID` /
/// `TG_API_HASH`, unless overridden per-account in the TOML file. Each
/// `RawAccount` expands into one `(AccountConfig, Service)` pair per
/// service so the pool can start one bridge per session file.
fn load_accounts(path: &Path) -> anyhow::Result<Vec<(AccountConfig, Service)>> {
    let shared_api_id: Option<i32> = env_non_empty("TG_API_ID").and_then(|v| v.parse().ok());
    let shared_api_hash = env_non_empty("TG_API_HASH");

    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read accounts file {}: {e}", path.display()))?;
    let parsed: AccountsFile = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse accounts file {}: {e}", path.display()))?;

    let mut bridges = Vec::new();
    for raw in parsed.accounts {
        let api_id = shared_api_id.unwrap_or(raw.api_id);
        let api_hash = shared_api_hash.clone().unwrap_or_else(|| raw.api_hash.clone());
        for service in Service::ALL {
            let Some(session_path) = raw.sessions.get(service.as_str()) else {
                anyhow::bail!("account '{}' has no session configured for service '{service}'", raw.name);
            };
            let account = AccountConfig {
                name: raw.name.clone(),
                session_path: session_path.clone(),
                api_id,
                api_hash: api_hash.clone(),
                priority: raw.priority,
                is_main: raw.is_main,
            };
            bridges.push((account, service));
        }
    }
    Ok(bridges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_non_empty_treats_blank_as_unset() {
        unsafe {
            std::env::set_var("TGMUX_TEST_BLANK", "   ");
        }
        assert_eq!(env_non_empty("TGMUX_TEST_BLANK"), None);
        unsafe {
            std::env::remove_var("TGMUX_TEST_BLANK");
        }
    }

    #[test]
    fn load_accounts_expands_service_product() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.toml");
        std::fs::write(
            &path,
            r#"
            [[account]]
            name = "main"
            api_id = 1
            api_hash = "hash"
            priority = 0
            is_main = true
            [account.sessions]
            create_chat = "main_create.session"
            send_text = "main_text.session"
            send_media = "main_media.session"
            leave_chat = "main_leave.session"

            [[account]]
            name = "b1"
            api_id = 2
            api_hash = "hash2"
            priority = 1
            [account.sessions]
            create_chat = "b1_create.session"
            send_text = "b1_text.session"
            send_media = "b1_media.session"
            leave_chat = "b1_leave.session"
            "#,
        )
        .unwrap();

        let bridges = load_accounts(&path).unwrap();
        assert_eq!(bridges.len(), 8);
        assert!(bridges.iter().all(|(a, _)| !a.session_path.is_empty()));
        let services: std::collections::HashSet<_> = bridges.iter().map(|(_, s)| *s).collect();
        assert_eq!(services, Service::ALL.into_iter().collect());
        let names: std::collections::HashSet<_> = bridges.iter().map(|(a, _)| a.name.as_str()).collect();
        assert_eq!(names, ["main", "b1"].into_iter().collect());
    }

    #[test]
    fn load_accounts_rejects_missing_session_for_a_service() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.toml");
        std::fs::write(
            &path,
            r#"
            [[account]]
            name = "main"
            api_id = 1
            api_hash = "hash"
            priority = 0
            [account.sessions]
            create_chat = "main_create.session"
            "#,
        )
        .unwrap();

        let err = load_accounts(&path).unwrap_err();
        assert!(err.to_string().contains("no session configured"));
    }
}
