/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - DROPIT Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use dropit_protocol::DEFAULT_CHUNK_SIZE;

use crate::error::ConfigError;

pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";
const MAX_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct DropConfig {
    /// WebSocket URL of the room relay, e.g. `wss://relay.example/ws`.
    pub signaling_url: String,
    /// ICE server URLs (e.g. `stun:stun.l.google.com:19302`, `turn:turn.example:3478?transport=udp`).
    pub ice_urls: Vec<String>,
    /// Optional ICE username (TURN).
    pub ice_username: Option<String>,
    /// Optional ICE credential (TURN).
    pub ice_credential: Option<String>,
    /// Bytes per binary chunk frame.
    pub chunk_size: usize,
    /// Sender pauses while the channel holds more than this many unsent bytes.
    pub buffered_amount_high: usize,
    /// Offer/answer + datachannel open.
    pub connect_timeout_secs: u64,
    /// WebSocket keepalive towards the relay.
    pub ping_interval_secs: u64,
    /// Largest declared file size a receiver accepts (files are buffered in memory).
    pub max_file_size: u64,
}

impl Default for DropConfig {
    fn default() -> Self {
        Self {
            signaling_url: String::new(),
            ice_urls: vec![DEFAULT_STUN_URL.to_string()],
            ice_username: None,
            ice_credential: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffered_amount_high: 1024 * 1024,
            connect_timeout_secs: 30,
            ping_interval_secs: 5,
            max_file_size: 4 * 1024 * 1024 * 1024,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        _ => Ok(None),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl DropConfig {
    /// Reads `DROPIT_*` variables on top of the defaults. The result is not
    /// validated yet: callers may still fill in the signaling URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(url) = env_string("DROPIT_SIGNALING_URL") {
            cfg.signaling_url = url;
        }
        if let Some(urls) = env_string("DROPIT_ICE_URLS") {
            cfg.ice_urls = split_urls(&urls);
        }
        cfg.ice_username = env_string("DROPIT_ICE_USERNAME");
        cfg.ice_credential = env_string("DROPIT_ICE_CREDENTIAL");
        if let Some(v) = env_parse("DROPIT_CHUNK_SIZE")? {
            cfg.chunk_size = v;
        }
        if let Some(v) = env_parse("DROPIT_BUFFERED_AMOUNT_HIGH")? {
            cfg.buffered_amount_high = v;
        }
        if let Some(v) = env_parse("DROPIT_CONNECT_TIMEOUT_SECS")? {
            cfg.connect_timeout_secs = v;
        }
        if let Some(v) = env_parse("DROPIT_PING_SECS")? {
            cfg.ping_interval_secs = v;
        }
        if let Some(v) = env_parse("DROPIT_MAX_FILE_SIZE")? {
            cfg.max_file_size = v;
        }
        Ok(cfg)
    }

    /// Checks required fields and clamps the numeric knobs into sane ranges.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.signaling_url = self.signaling_url.trim().to_string();
        if self.signaling_url.is_empty() {
            return Err(ConfigError::Missing("signaling_url"));
        }
        if !(self.signaling_url.starts_with("ws://") || self.signaling_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                key: "signaling_url",
                value: self.signaling_url,
            });
        }
        self.ice_urls.retain(|u| !u.trim().is_empty());
        self.chunk_size = self.chunk_size.clamp(1, MAX_CHUNK_SIZE);
        self.buffered_amount_high = self.buffered_amount_high.max(self.chunk_size);
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(5, 300);
        self.ping_interval_secs = self.ping_interval_secs.clamp(1, 60);
        Ok(self)
    }
}

pub fn split_urls(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_protocol_constants() {
        let cfg = DropConfig::default();
        assert_eq!(cfg.chunk_size, 16384);
        assert_eq!(cfg.ice_urls, vec![DEFAULT_STUN_URL.to_string()]);
        assert!(cfg.signaling_url.is_empty());
    }

    #[test]
    fn signaling_url_is_required() {
        let err = DropConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("signaling_url")));

        let cfg = DropConfig {
            signaling_url: "http://relay".to_string(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn validate_clamps_knobs() {
        let cfg = DropConfig {
            signaling_url: " ws://127.0.0.1:8080/ws ".to_string(),
            chunk_size: 0,
            buffered_amount_high: 0,
            connect_timeout_secs: 1,
            ice_urls: vec![" ".to_string(), "stun:a".to_string()],
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(cfg.signaling_url, "ws://127.0.0.1:8080/ws");
        assert_eq!(cfg.chunk_size, 1);
        assert_eq!(cfg.buffered_amount_high, 1);
        assert_eq!(cfg.connect_timeout_secs, 5);
        assert_eq!(cfg.ice_urls, vec!["stun:a".to_string()]);
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: DropConfig =
            serde_json::from_str(r#"{"signaling_url":"wss://r/ws","chunk_size":4096}"#).unwrap();
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.connect_timeout_secs, 30);
    }

    #[test]
    fn split_urls_skips_blanks() {
        assert_eq!(
            split_urls("stun:a, ,turn:b?transport=udp,"),
            vec!["stun:a".to_string(), "turn:b?transport=udp".to_string()]
        );
    }
}
