use std::fmt;

use serde::{Deserialize, Serialize};

/// Display role of a session participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Teacher => write!(f, "teacher"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// Everything needed to enter one live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub signaling_url: String,
    pub session_id: String,
    pub batch_id: String,
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
    /// STUN servers handed to every peer connection. No TURN fallback is
    /// configured; sessions behind restrictive NATs may fail to connect.
    pub ice_servers: Vec<String>,
}

impl SessionConfig {
    pub fn new(
        signaling_url: impl Into<String>,
        session_id: impl Into<String>,
        batch_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            session_id: session_id.into(),
            batch_id: batch_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
            ice_servers: default_ice_servers(),
        }
    }
}

pub fn default_ice_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_owned(),
        "stun:stun1.l.google.com:19302".to_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Teacher).unwrap(), "\"teacher\"");
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
    }

    #[test]
    fn config_gets_stun_servers_by_default() {
        let config = SessionConfig::new("ws://localhost:8080", "s1", "b1", "u1", "Asha", Role::Student);
        assert!(!config.ice_servers.is_empty());
        assert!(config.ice_servers.iter().all(|url| url.starts_with("stun:")));
    }
}
