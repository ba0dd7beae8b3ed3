use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PackConfig {
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_mem_size: String,
    #[serde(deserialize_with = "string_or_usize")]
    pub pack_decode_disk_size: String,
    pub pack_decode_cache_path: PathBuf,
    pub clean_cache_after_decode: bool,
    pub channel_message_size: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            pack_decode_mem_size: "4G".to_string(),
            pack_decode_disk_size: "20%".to_string(),
            pack_decode_cache_path: PathBuf::from("pack_decode_cache"),
            clean_cache_after_decode: true,
            channel_message_size: 1_000_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LfsConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
}

impl Default for LfsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

/// Listen address and repository root for the HTTP transport.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub repo_root: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            repo_root: PathBuf::from("repos"),
            request_timeout_secs: 60,
        }
    }
}

/// Thresholds and cache sizing for the hot/warm/cold object store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TieredStoreConfig {
    pub max_age_in_hot_secs: u64,
    pub min_access_count: u64,
    #[serde(deserialize_with = "string_or_usize")]
    pub max_hot_size: String,
    pub lru_max_count: usize,
    #[serde(deserialize_with = "string_or_usize")]
    pub lru_max_bytes: String,
    pub lru_default_ttl_secs: Option<u64>,
    pub migration_lock_timeout_secs: u64,
    pub verify_checksum_on_migrate: bool,
}

impl Default for TieredStoreConfig {
    fn default() -> Self {
        Self {
            max_age_in_hot_secs: 24 * 3600,
            min_access_count: 2,
            max_hot_size: "1G".to_string(),
            lru_max_count: 10_000,
            lru_max_bytes: "512M".to_string(),
            lru_default_ttl_secs: None,
            migration_lock_timeout_secs: 5,
            verify_checksum_on_migrate: true,
        }
    }
}

/// Defaults applied to hooks that don't specify their own timeout/retry policy.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HookConfig {
    pub default_timeout_secs: u64,
    pub default_retry_max_attempts: u32,
    pub default_retry_base_delay_ms: u64,
    pub default_retry_backoff: f64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 10,
            default_retry_max_attempts: 3,
            default_retry_base_delay_ms: 200,
            default_retry_backoff: 2.0,
        }
    }
}

/// Buffering, batching, and retry policy for the change-data-capture pipeline.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CdcConfig {
    pub max_buffer_size: usize,
    pub batch_size: usize,
    pub batch_interval_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

impl Default for CdcConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 10_000,
            batch_size: 100,
            batch_interval_secs: 5,
            max_retries: 5,
            base_backoff_ms: 100,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Server-wide defaults consulted when a repository declares no branch-protection rules of its
/// own (e.g. `main`/`master` always force-push-protected).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BranchProtectionDefaults {
    pub protected_patterns: Vec<String>,
    pub block_force_push_by_default: bool,
    pub block_deletion_by_default: bool,
}

impl Default for BranchProtectionDefaults {
    fn default() -> Self {
        Self {
            protected_patterns: vec!["main".to_string(), "master".to_string()],
            block_force_push_by_default: true,
            block_deletion_by_default: true,
        }
    }
}

fn string_or_usize<'deserialize, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'deserialize>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrUSize {
        String(String),
        USize(usize),
    }

    Ok(match StringOrUSize::deserialize(deserializer)? {
        StringOrUSize::String(v) => v,
        StringOrUSize::USize(v) => v.to_string(),
    })
}
