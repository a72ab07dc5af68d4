use thiserror::Error;

/// Errors surfaced by the protocol session layer, classified the way
/// `core/router.py::handle_error` classified raw exception text: flood
/// waits and bans get dedicated variants because the bridge and router
/// treat them specially; everything else is a generic transient failure.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("flood wait: retry after {seconds}s")]
    FloodWait { seconds: u32 },

    #[error("account banned or deactivated: {detail}")]
    Banned { detail: String },

    #[error("entity not resolvable: {reference} (cache size {cache_size})")]
    EntityNotFound { reference: String, cache_size: usize },

    #[error("not authorized: session is not logged in")]
    NotAuthorized,

    #[error("username not occupied: {0}")]
    UsernameNotOccupied(String),

    #[error("peer id invalid: {0}")]
    PeerIdInvalid(String),

    #[error("file reference expired: {0}")]
    FileReferenceExpired(String),

    #[error("transient network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Other(String),
}

impl ProtocolError {
    /// Classify a raw error string the way the original router did with
    /// substring checks on the exception's `str()`.
    pub fn classify(raw: &str) -> ProtocolError {
        let lower = raw.to_lowercase();
        if lower.contains("flood") {
            let seconds = lower
                .split(|c: char| !c.is_ascii_digit())
                .find_map(|tok| tok.parse::<u32>().ok())
                .unwrap_or(60);
            return ProtocolError::FloodWait { seconds };
        }
        if lower.contains("banned") || lower.contains("deactivated") {
            return ProtocolError::Banned { detail: raw.to_string() };
        }
        if lower.contains("not authorized") || lower.contains("unauthorized") {
            return ProtocolError::NotAuthorized;
        }
        if lower.contains("username_not_occupied") || lower.contains("username not occupied") {
            return ProtocolError::UsernameNotOccupied(raw.to_string());
        }
        if lower.contains("peer_id_invalid") || lower.contains("peer id invalid") {
            return ProtocolError::PeerIdInvalid(raw.to_string());
        }
        if lower.contains("file_reference") && lower.contains("expired") {
            return ProtocolError::FileReferenceExpired(raw.to_string());
        }
        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("broken pipe")
            || lower.contains("persistent timestamp")
        {
            return ProtocolError::Network(raw.to_string());
        }
        tracing::debug!(raw_error = raw, "error did not match a known classification, treating as generic");
        ProtocolError::Other(raw.to_string())
    }

    /// Whether a retry/reconnect wrapper should attempt this call again
    /// locally. Flood waits and bans must propagate to the caller instead —
    /// retrying them locally only burns the wait window.
    pub fn is_locally_retriable(&self) -> bool {
        matches!(self, ProtocolError::Network(_))
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_wait_extracts_seconds() {
        let err = ProtocolError::classify("A wait of 35 seconds is required (caused by ...)");
        assert!(matches!(err, ProtocolError::FloodWait { seconds: 35 }));
    }

    #[test]
    fn banned_is_classified() {
        let err = ProtocolError::classify("The user has been deactivated");
        assert!(matches!(err, ProtocolError::Banned { .. }));
    }

    #[test]
    fn network_errors_are_locally_retriable() {
        let err = ProtocolError::classify("Connection reset by peer");
        assert!(err.is_locally_retriable());
    }

    #[test]
    fn flood_wait_is_not_locally_retriable() {
        let err = ProtocolError::classify("A wait of 10 seconds is required");
        assert!(!err.is_locally_retriable());
    }

    #[test]
    fn username_not_occupied_is_classified() {
        let err = ProtocolError::classify("USERNAME_NOT_OCCUPIED");
        assert!(matches!(err, ProtocolError::UsernameNotOccupied(_)));
        assert!(!err.is_locally_retriable());
    }

    #[test]
    fn peer_id_invalid_is_classified() {
        let err = ProtocolError::classify("PEER_ID_INVALID");
        assert!(matches!(err, ProtocolError::PeerIdInvalid(_)));
    }

    #[test]
    fn file_reference_expired_is_classified() {
        let err = ProtocolError::classify("FILE_REFERENCE_EXPIRED for this media");
        assert!(matches!(err, ProtocolError::FileReferenceExpired(_)));
    }

    #[test]
    fn persistent_timestamp_outdated_is_locally_retriable() {
        let err = ProtocolError::classify("persistent timestamp outdated, reconnecting");
        assert!(err.is_locally_retriable());
    }
}
