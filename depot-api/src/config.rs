//! API Configuration Module
//!
//! Tenant resolution, encryption, health checking and scheduling settings.
//! Everything is loaded from `DEPOT_*` environment variables with defaults
//! for development; [`ApiConfig::validate`] rejects combinations that must
//! not reach a running server.

use std::time::Duration;

use depot_core::{is_valid_slug, ConfigError, KEY_SIZE};
use depot_storage::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_MIN_QUORUM};
use secrecy::{ExposeSecret, SecretString};

use crate::constants::*;
use crate::jobs::SchedulerConfig;

// ============================================================================
// ENVIRONMENT HELPERS
// ============================================================================

/// Variable lookup. Production passes `std::env::var`; tests pass a map.
pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub(crate) fn parse_or<T: std::str::FromStr>(get: Lookup<'_>, key: &str, default: T) -> T {
    get(key).and_then(|s| s.parse().ok()).unwrap_or(default)
}

pub(crate) fn secs_or(get: Lookup<'_>, key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(parse_or(get, key, default_secs))
}

pub(crate) fn flag_or(get: Lookup<'_>, key: &str, default: bool) -> bool {
    get(key)
        .map(|s| {
            let s = s.to_lowercase();
            s == "true" || s == "1"
        })
        .unwrap_or(default)
}

fn non_empty(get: Lookup<'_>, key: &str) -> Option<String> {
    get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============================================================================
// TENANT CONFIGURATION
// ============================================================================

/// How requests are mapped to tenants.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    /// Base domain for subdomain routing, e.g. `example.com`.
    pub base_domain: Option<String>,

    /// Header carrying an explicit tenant slug. Lowercase.
    pub header_name: String,

    /// Fall back to `default_tenant` when a request carries no tenant signal.
    pub allow_default_tenant: bool,

    /// Slug of the fallback tenant.
    pub default_tenant: Option<String>,

    pub cache_ttl: Duration,

    pub cache_sweep_interval: Duration,

    /// Paths that bypass tenant resolution. A trailing `/*` matches any suffix.
    pub public_paths: Vec<String>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            base_domain: None,
            header_name: DEFAULT_TENANT_HEADER.to_string(),
            allow_default_tenant: false,
            default_tenant: None,
            cache_ttl: Duration::from_secs(DEFAULT_TENANT_CACHE_TTL_SECS),
            cache_sweep_interval: Duration::from_secs(DEFAULT_TENANT_CACHE_SWEEP_SECS),
            public_paths: DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl TenantConfig {
    /// Load from environment variables.
    ///
    /// - `DEPOT_BASE_DOMAIN`
    /// - `DEPOT_TENANT_HEADER` (default: `x-tenant-slug`)
    /// - `DEPOT_ALLOW_DEFAULT_TENANT` (default: false)
    /// - `DEPOT_DEFAULT_TENANT`
    /// - `DEPOT_TENANT_CACHE_TTL_SECS` (default: 300)
    /// - `DEPOT_TENANT_CACHE_SWEEP_SECS` (default: 60)
    /// - `DEPOT_PUBLIC_PATHS`: comma-separated, appended to the built-in list
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub(crate) fn from_lookup(get: Lookup<'_>) -> Self {
        let mut public_paths: Vec<String> =
            DEFAULT_PUBLIC_PATHS.iter().map(|p| p.to_string()).collect();
        if let Some(extra) = get("DEPOT_PUBLIC_PATHS") {
            public_paths.extend(
                extra
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty()),
            );
        }

        Self {
            base_domain: non_empty(get, "DEPOT_BASE_DOMAIN").map(|d| d.to_lowercase()),
            header_name: non_empty(get, "DEPOT_TENANT_HEADER")
                .map(|h| h.to_lowercase())
                .unwrap_or_else(|| DEFAULT_TENANT_HEADER.to_string()),
            allow_default_tenant: flag_or(get, "DEPOT_ALLOW_DEFAULT_TENANT", false),
            default_tenant: non_empty(get, "DEPOT_DEFAULT_TENANT"),
            cache_ttl: secs_or(get, "DEPOT_TENANT_CACHE_TTL_SECS", DEFAULT_TENANT_CACHE_TTL_SECS),
            cache_sweep_interval: secs_or(
                get,
                "DEPOT_TENANT_CACHE_SWEEP_SECS",
                DEFAULT_TENANT_CACHE_SWEEP_SECS,
            ),
            public_paths,
        }
    }

    /// Whether `path` bypasses tenant resolution.
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|pattern| match pattern.strip_suffix("/*") {
            Some(prefix) => path
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/')),
            None => path == pattern,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_default_tenant {
            match self.default_tenant.as_deref() {
                None => {
                    return Err(ConfigError::MissingRequired {
                        field: "DEPOT_DEFAULT_TENANT".to_string(),
                    })
                }
                Some(slug) if !is_valid_slug(slug) => {
                    return Err(ConfigError::InvalidValue {
                        field: "DEPOT_DEFAULT_TENANT".to_string(),
                        value: slug.to_string(),
                        reason: "not a valid tenant slug".to_string(),
                    })
                }
                Some(_) => {}
            }
        }
        if self.cache_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "DEPOT_TENANT_CACHE_TTL_SECS".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.header_name.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "DEPOT_TENANT_HEADER".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ENCRYPTION CONFIGURATION
// ============================================================================

/// KMS and key cache settings.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// KEK id every tenant master key is wrapped under.
    pub kms_key_id: Option<String>,

    /// Hex-encoded 32-byte master key for the local KMS.
    pub local_master_key: Option<SecretString>,

    pub key_cache_ttl: Duration,

    pub key_cache_sweep_interval: Duration,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            kms_key_id: None,
            local_master_key: None,
            key_cache_ttl: Duration::from_secs(DEFAULT_KEY_CACHE_TTL_SECS),
            key_cache_sweep_interval: Duration::from_secs(DEFAULT_KEY_CACHE_SWEEP_SECS),
        }
    }
}

impl EncryptionConfig {
    /// Load from environment variables.
    ///
    /// - `DEPOT_KMS_KEY_ID` (required)
    /// - `DEPOT_KMS_LOCAL_KEY`: 64 hex characters
    /// - `DEPOT_KEY_CACHE_TTL_SECS` (default: 300)
    /// - `DEPOT_KEY_CACHE_SWEEP_SECS` (default: 60)
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub(crate) fn from_lookup(get: Lookup<'_>) -> Self {
        Self {
            kms_key_id: non_empty(get, "DEPOT_KMS_KEY_ID"),
            local_master_key: non_empty(get, "DEPOT_KMS_LOCAL_KEY").map(SecretString::from),
            key_cache_ttl: secs_or(get, "DEPOT_KEY_CACHE_TTL_SECS", DEFAULT_KEY_CACHE_TTL_SECS),
            key_cache_sweep_interval: secs_or(
                get,
                "DEPOT_KEY_CACHE_SWEEP_SECS",
                DEFAULT_KEY_CACHE_SWEEP_SECS,
            ),
        }
    }

    /// Decode the local master key, if one is configured.
    pub fn local_key_bytes(&self) -> Result<Option<[u8; KEY_SIZE]>, ConfigError> {
        let Some(secret) = &self.local_master_key else {
            return Ok(None);
        };
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "DEPOT_KMS_LOCAL_KEY".to_string(),
            value: "<redacted>".to_string(),
            reason: reason.to_string(),
        };
        let bytes = hex::decode(secret.expose_secret().trim())
            .map_err(|_| invalid("must be hex encoded"))?;
        let key: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| invalid("must decode to exactly 32 bytes"))?;
        Ok(Some(key))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kms_key_id.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "DEPOT_KMS_KEY_ID".to_string(),
            });
        }
        self.local_key_bytes()?;
        Ok(())
    }
}

// ============================================================================
// HEALTH CONFIGURATION
// ============================================================================

/// One storage replica to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageNode {
    pub id: String,
    pub url: String,
}

/// Parse `id=url,id=url`. Entries without `=` keep an empty url, which
/// [`HealthConfig::validate`] rejects.
pub fn parse_storage_nodes(raw: &str) -> Vec<StorageNode> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((id, url)) => StorageNode {
                id: id.trim().to_string(),
                url: url.trim().trim_end_matches('/').to_string(),
            },
            None => StorageNode {
                id: entry.to_string(),
                url: String::new(),
            },
        })
        .collect()
}

/// Health checking and replica tracking settings.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub refresh_interval: Duration,
    pub check_timeout: Duration,
    pub readiness_timeout: Duration,
    pub max_replication_lag: Duration,
    pub min_quorum: usize,
    pub node_failure_threshold: u32,
    pub node_probe_interval: Duration,
    pub node_probe_timeout: Duration,
    pub storage_nodes: Vec<StorageNode>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_HEALTH_REFRESH_SECS),
            check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
            readiness_timeout: Duration::from_secs(DEFAULT_READINESS_TIMEOUT_SECS),
            max_replication_lag: Duration::from_secs(DEFAULT_MAX_REPLICATION_LAG_SECS),
            min_quorum: DEFAULT_MIN_QUORUM,
            node_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            node_probe_interval: Duration::from_secs(DEFAULT_NODE_PROBE_INTERVAL_SECS),
            node_probe_timeout: Duration::from_secs(DEFAULT_NODE_PROBE_TIMEOUT_SECS),
            storage_nodes: Vec::new(),
        }
    }
}

impl HealthConfig {
    /// Load from environment variables.
    ///
    /// - `DEPOT_HEALTH_REFRESH_SECS` (default: 15)
    /// - `DEPOT_HEALTH_TIMEOUT_SECS` (default: 5)
    /// - `DEPOT_READINESS_TIMEOUT_SECS` (default: 3)
    /// - `DEPOT_MAX_REPLICATION_LAG_SECS` (default: 30)
    /// - `DEPOT_MIN_QUORUM` (default: 2)
    /// - `DEPOT_NODE_FAILURE_THRESHOLD` (default: 3)
    /// - `DEPOT_NODE_PROBE_INTERVAL_SECS` (default: 10)
    /// - `DEPOT_NODE_PROBE_TIMEOUT_SECS` (default: 2)
    /// - `DEPOT_STORAGE_NODES`: `id=url,id=url`
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub(crate) fn from_lookup(get: Lookup<'_>) -> Self {
        Self {
            refresh_interval: secs_or(get, "DEPOT_HEALTH_REFRESH_SECS", DEFAULT_HEALTH_REFRESH_SECS),
            check_timeout: secs_or(
                get,
                "DEPOT_HEALTH_TIMEOUT_SECS",
                DEFAULT_HEALTH_CHECK_TIMEOUT_SECS,
            ),
            readiness_timeout: secs_or(
                get,
                "DEPOT_READINESS_TIMEOUT_SECS",
                DEFAULT_READINESS_TIMEOUT_SECS,
            ),
            max_replication_lag: secs_or(
                get,
                "DEPOT_MAX_REPLICATION_LAG_SECS",
                DEFAULT_MAX_REPLICATION_LAG_SECS,
            ),
            min_quorum: parse_or(get, "DEPOT_MIN_QUORUM", DEFAULT_MIN_QUORUM),
            node_failure_threshold: parse_or(
                get,
                "DEPOT_NODE_FAILURE_THRESHOLD",
                DEFAULT_FAILURE_THRESHOLD,
            ),
            node_probe_interval: secs_or(
                get,
                "DEPOT_NODE_PROBE_INTERVAL_SECS",
                DEFAULT_NODE_PROBE_INTERVAL_SECS,
            ),
            node_probe_timeout: secs_or(
                get,
                "DEPOT_NODE_PROBE_TIMEOUT_SECS",
                DEFAULT_NODE_PROBE_TIMEOUT_SECS,
            ),
            storage_nodes: get("DEPOT_STORAGE_NODES")
                .map(|raw| parse_storage_nodes(&raw))
                .unwrap_or_default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("DEPOT_HEALTH_REFRESH_SECS", self.refresh_interval),
            ("DEPOT_HEALTH_TIMEOUT_SECS", self.check_timeout),
            ("DEPOT_NODE_PROBE_INTERVAL_SECS", self.node_probe_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: "0".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
        }
        if let Some(node) = self
            .storage_nodes
            .iter()
            .find(|n| n.id.is_empty() || n.url.is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "DEPOT_STORAGE_NODES".to_string(),
                value: node.id.clone(),
                reason: "expected id=url".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Everything the server needs apart from the database.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    pub tenant: TenantConfig,
    pub encryption: EncryptionConfig,
    pub health: HealthConfig,
    pub scheduler: SchedulerConfig,

    /// Operator-supplied first-run admin password, used only to warn when it
    /// is still in use.
    pub bootstrap_admin_password: Option<SecretString>,

    /// Bearer token for operator-only routes. Unset disables them.
    pub operator_token: Option<SecretString>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    pub(crate) fn from_lookup(get: Lookup<'_>) -> Self {
        Self {
            tenant: TenantConfig::from_lookup(get),
            encryption: EncryptionConfig::from_lookup(get),
            health: HealthConfig::from_lookup(get),
            scheduler: SchedulerConfig::from_lookup(get),
            bootstrap_admin_password: non_empty(get, "DEPOT_BOOTSTRAP_ADMIN_PASSWORD")
                .map(SecretString::from),
            operator_token: non_empty(get, "DEPOT_OPERATOR_TOKEN").map(SecretString::from),
        }
    }

    /// Reject configurations that must not start. Errors are fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tenant.validate()?;
        self.encryption.validate()?;
        self.health.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_lookup() -> impl Fn(&str) -> Option<String> {
        lookup_from(&[("DEPOT_KMS_KEY_ID", "depot-kek")])
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_lookup(&valid_lookup());
        assert_eq!(config.tenant.header_name, "x-tenant-slug");
        assert_eq!(config.tenant.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.health.refresh_interval, Duration::from_secs(15));
        assert_eq!(config.health.min_quorum, 2);
        assert!(config.operator_token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_tenant_must_be_named() {
        let get = lookup_from(&[
            ("DEPOT_KMS_KEY_ID", "depot-kek"),
            ("DEPOT_ALLOW_DEFAULT_TENANT", "true"),
        ]);
        let err = ApiConfig::from_lookup(&get).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "DEPOT_DEFAULT_TENANT".into()
            }
        );
    }

    #[test]
    fn test_default_tenant_slug_is_checked() {
        let get = lookup_from(&[
            ("DEPOT_KMS_KEY_ID", "depot-kek"),
            ("DEPOT_ALLOW_DEFAULT_TENANT", "1"),
            ("DEPOT_DEFAULT_TENANT", "Not_A_Slug"),
        ]);
        assert!(matches!(
            ApiConfig::from_lookup(&get).validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_kms_key_is_fatal() {
        let config = ApiConfig::from_lookup(&lookup_from(&[]));
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingRequired {
                field: "DEPOT_KMS_KEY_ID".into()
            })
        );
    }

    #[test]
    fn test_local_key_decoding() {
        let good = "11".repeat(32);
        let get = lookup_from(&[("DEPOT_KMS_KEY_ID", "k"), ("DEPOT_KMS_LOCAL_KEY", good.as_str())]);
        let config = EncryptionConfig::from_lookup(&get);
        assert_eq!(config.local_key_bytes(), Ok(Some([0x11; 32])));

        let get = lookup_from(&[("DEPOT_KMS_KEY_ID", "k"), ("DEPOT_KMS_LOCAL_KEY", "abcd")]);
        let config = EncryptionConfig::from_lookup(&get);
        assert!(config.validate().is_err());

        let get = lookup_from(&[("DEPOT_KMS_KEY_ID", "k"), ("DEPOT_KMS_LOCAL_KEY", "zz")]);
        let err = EncryptionConfig::from_lookup(&get).validate().unwrap_err();
        assert!(!err.to_string().contains("zz"));
    }

    #[test]
    fn test_storage_node_parsing() {
        let nodes = parse_storage_nodes("a=http://a:9000/, b = http://b:9000 ,,c");
        assert_eq!(
            nodes,
            vec![
                StorageNode {
                    id: "a".into(),
                    url: "http://a:9000".into()
                },
                StorageNode {
                    id: "b".into(),
                    url: "http://b:9000".into()
                },
                StorageNode {
                    id: "c".into(),
                    url: String::new()
                },
            ]
        );

        let config = HealthConfig {
            storage_nodes: nodes,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_paths() {
        let config = TenantConfig::default();
        assert!(config.is_public_path("/health"));
        assert!(config.is_public_path("/health/ready"));
        assert!(config.is_public_path("/api/v1/tenants/lookup/alpha"));
        assert!(config.is_public_path("/metrics"));
        assert!(!config.is_public_path("/healthz"));
        assert!(!config.is_public_path("/api/v1/tenants/lookup"));
        assert!(!config.is_public_path("/api/v1/whoami"));
    }

    #[test]
    fn test_extra_public_paths_are_appended() {
        let get = lookup_from(&[("DEPOT_PUBLIC_PATHS", "/status, /docs/*")]);
        let config = TenantConfig::from_lookup(&get);
        assert!(config.is_public_path("/status"));
        assert!(config.is_public_path("/docs/intro"));
        assert!(config.is_public_path("/health"));
    }

    #[test]
    fn test_header_name_is_lowercased() {
        let get = lookup_from(&[("DEPOT_TENANT_HEADER", "X-Depot-Tenant")]);
        assert_eq!(TenantConfig::from_lookup(&get).header_name, "x-depot-tenant");
    }
}
