use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::chain::ConfirmationPolicy;
use crate::gate::UnlockCheckPolicy;

pub const GATEWAY_URL_ENV: &str = "TOONCHAIN_GATEWAY_URL";
pub const SERIES_APP_ENV: &str = "TOONCHAIN_SERIES_APP_ID";
pub const EPISODE_APP_ENV: &str = "TOONCHAIN_EPISODE_APP_ID";
pub const EPISODE_NFT_APP_ENV: &str = "TOONCHAIN_EPISODE_NFT_APP_ID";
pub const STORAGE_ENDPOINT_ENV: &str = "TOONCHAIN_STORAGE_ENDPOINT";
pub const STORAGE_TOKEN_ENV: &str = "WEB3_STORAGE_TOKEN";
pub const IPFS_GATEWAY_ENV: &str = "TOONCHAIN_IPFS_GATEWAY";
pub const METADATA_CACHE_ENV: &str = "TOONCHAIN_METADATA_CACHE";
pub const CONFIRMATION_POLICY_ENV: &str = "TOONCHAIN_CONFIRMATION_POLICY";
pub const UNLOCK_POLICY_ENV: &str = "TOONCHAIN_UNLOCK_POLICY";

/// Placeholder id used until the applications are deployed.
pub const UNDEPLOYED_APP_ID: &str = "0x0000000000000000000000000000000000000000";
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:8080";
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://api.web3.storage/upload";
pub const DEFAULT_IPFS_GATEWAY: &str = "w3s.link";
pub const DEFAULT_METADATA_CACHE: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised setting `{0}`")]
pub struct InvalidSetting(pub String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppIds {
    pub series: String,
    pub episode: String,
    pub episode_nft: String,
}

impl Default for AppIds {
    fn default() -> Self {
        Self {
            series: UNDEPLOYED_APP_ID.to_string(),
            episode: UNDEPLOYED_APP_ID.to_string(),
            episode_nft: UNDEPLOYED_APP_ID.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub endpoint: String,
    pub token: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(), token: None }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub gateway_url: String,
    pub apps: AppIds,
    pub request_timeout: Duration,
    pub confirmation: ConfirmationPolicy,
    /// Upper bound on waiting for a write to satisfy `confirmation`.
    pub finality_timeout: Duration,
    pub poll_interval: Duration,
    pub unlock_policy: UnlockCheckPolicy,
    pub storage: StorageConfig,
    pub ipfs_gateway_host: String,
    /// Metadata documents kept in memory; zero disables the cache.
    pub metadata_cache: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            apps: AppIds::default(),
            request_timeout: Duration::from_secs(10),
            confirmation: ConfirmationPolicy::default(),
            finality_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            unlock_policy: UnlockCheckPolicy::default(),
            storage: StorageConfig::default(),
            ipfs_gateway_host: DEFAULT_IPFS_GATEWAY.to_string(),
            metadata_cache: DEFAULT_METADATA_CACHE,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup, falling back to defaults for unset or unparsable keys.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(url) = get(GATEWAY_URL_ENV) {
            config.gateway_url = url;
        }
        if let Some(id) = get(SERIES_APP_ENV) {
            config.apps.series = id;
        }
        if let Some(id) = get(EPISODE_APP_ENV) {
            config.apps.episode = id;
        }
        if let Some(id) = get(EPISODE_NFT_APP_ENV) {
            config.apps.episode_nft = id;
        }
        if let Some(endpoint) = get(STORAGE_ENDPOINT_ENV) {
            config.storage.endpoint = endpoint;
        }
        config.storage.token = get(STORAGE_TOKEN_ENV);
        if let Some(host) = get(IPFS_GATEWAY_ENV) {
            config.ipfs_gateway_host = host;
        }
        parse_into(&mut config.confirmation, CONFIRMATION_POLICY_ENV, get(CONFIRMATION_POLICY_ENV));
        parse_into(&mut config.unlock_policy, UNLOCK_POLICY_ENV, get(UNLOCK_POLICY_ENV));
        parse_into(&mut config.metadata_cache, METADATA_CACHE_ENV, get(METADATA_CACHE_ENV));
        config
    }
}

fn parse_into<T: FromStr>(slot: &mut T, key: &str, value: Option<String>) {
    if let Some(value) = value {
        match value.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => warn!("ignoring {key}={value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_undeployed_setup() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config.gateway_url, "http://localhost:8080");
        assert_eq!(config.apps.series, UNDEPLOYED_APP_ID);
        assert_eq!(config.storage.endpoint, "https://api.web3.storage/upload");
        assert_eq!(config.storage.token, None);
        assert_eq!(config.ipfs_gateway_host, "w3s.link");
        assert_eq!(config.unlock_policy, UnlockCheckPolicy::FailOpen);
        assert_eq!(config.confirmation, ConfirmationPolicy::Depth(1));
    }

    #[test]
    fn lookup_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (GATEWAY_URL_ENV, "http://node:9000/"),
            (EPISODE_APP_ENV, "e476"),
            (STORAGE_TOKEN_ENV, "  secret "),
            (CONFIRMATION_POLICY_ENV, "finalized"),
            (UNLOCK_POLICY_ENV, "closed"),
            (METADATA_CACHE_ENV, "lots"),
            (SERIES_APP_ENV, "   "),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.gateway_url, "http://node:9000/");
        assert_eq!(config.apps.episode, "e476");
        assert_eq!(config.apps.series, UNDEPLOYED_APP_ID);
        assert_eq!(config.storage.token.as_deref(), Some("secret"));
        assert_eq!(config.confirmation, ConfirmationPolicy::Finality);
        assert_eq!(config.unlock_policy, UnlockCheckPolicy::FailClosed);
        assert_eq!(config.metadata_cache, DEFAULT_METADATA_CACHE);
    }

    #[test]
    fn unparsable_settings_keep_defaults() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(CONFIRMATION_POLICY_ENV, "soon"), (UNLOCK_POLICY_ENV, "maybe"), (METADATA_CACHE_ENV, "0")]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.confirmation, ConfirmationPolicy::default());
        assert_eq!(config.unlock_policy, UnlockCheckPolicy::FailOpen);
        assert_eq!(config.metadata_cache, 0);
    }
}
