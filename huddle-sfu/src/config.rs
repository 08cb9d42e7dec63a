//! SFU Configuration

use serde::{Deserialize, Serialize};

/// Default public STUN endpoint used when nothing is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// STUN server URLs handed to every server-side peer connection
    pub stun_servers: Vec<String>,
    /// Size of the RTCP drain buffer for each subscriber sender
    pub rtcp_buffer_size: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            rtcp_buffer_size: 1500,
        }
    }
}

impl SfuConfig {
    /// STUN servers, falling back to the default endpoint when the list is empty
    #[must_use]
    pub fn effective_stun_servers(&self) -> Vec<String> {
        if self.stun_servers.is_empty() {
            vec![DEFAULT_STUN_SERVER.to_string()]
        } else {
            self.stun_servers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_stun() {
        let config = SfuConfig::default();
        assert_eq!(config.stun_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
    }

    #[test]
    fn test_empty_stun_list_falls_back() {
        let config = SfuConfig {
            stun_servers: Vec::new(),
            ..Default::default()
        };
        assert_eq!(config.effective_stun_servers().len(), 1);
    }
}
