//! Client configuration
//!
//! Configuration is loaded from environment variables with sensible
//! defaults, or assembled with the `with_*` builders.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, QuiverResult};
use crate::field_key::UnresolvedVariablePolicy;

/// How a call consults the store and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FetchPolicy {
    /// Resolve from the store only. Missing data yields `None` data.
    CacheOnly,
    /// Use cached data when complete, otherwise fetch and store.
    #[default]
    CacheFirst,
    /// Always fetch and store.
    NetworkOnly,
    /// Fetch and store; fall back to the store on network failure.
    NetworkFirst,
    /// Deliver cached data (if any) first, then the network result.
    CacheAndNetwork,
}

impl fmt::Display for FetchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchPolicy::CacheOnly => "cache-only",
            FetchPolicy::CacheFirst => "cache-first",
            FetchPolicy::NetworkOnly => "network-only",
            FetchPolicy::NetworkFirst => "network-first",
            FetchPolicy::CacheAndNetwork => "cache-and-network",
        };
        f.write_str(name)
    }
}

impl FromStr for FetchPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "cache-only" => Ok(FetchPolicy::CacheOnly),
            "cache-first" => Ok(FetchPolicy::CacheFirst),
            "network-only" => Ok(FetchPolicy::NetworkOnly),
            "network-first" => Ok(FetchPolicy::NetworkFirst),
            "cache-and-network" => Ok(FetchPolicy::CacheAndNetwork),
            _ => Err(ConfigError::InvalidValue {
                field: "fetch_policy".to_string(),
                value: s.to_string(),
                reason: "expected cache-only, cache-first, network-only, network-first or cache-and-network".to_string(),
            }),
        }
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Policy used by calls that do not set one.
    pub default_fetch_policy: FetchPolicy,

    /// Handling of arguments referencing undefined variables.
    pub unresolved_variables: UnresolvedVariablePolicy,

    /// Maximum number of records kept by the default store.
    /// `None` means unbounded.
    pub store_capacity: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_fetch_policy: FetchPolicy::CacheFirst,
            unresolved_variables: UnresolvedVariablePolicy::Null,
            store_capacity: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables.
    ///
    /// Environment variables:
    /// - `QUIVER_FETCH_POLICY`: default fetch policy (default: cache-first)
    /// - `QUIVER_STRICT_VARIABLES`: "true" to fail on undefined variables (default: false)
    /// - `QUIVER_STORE_CAPACITY`: record limit of the default store (default: unbounded)
    pub fn from_env() -> QuiverResult<Self> {
        let mut config = Self::default();

        if let Ok(policy) = std::env::var("QUIVER_FETCH_POLICY") {
            config.default_fetch_policy = policy.parse()?;
        }

        let strict = std::env::var("QUIVER_STRICT_VARIABLES")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);
        if strict {
            config.unresolved_variables = UnresolvedVariablePolicy::Strict;
        }

        if let Ok(capacity) = std::env::var("QUIVER_STORE_CAPACITY") {
            let parsed = capacity.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                field: "store_capacity".to_string(),
                value: capacity.clone(),
                reason: "must be a positive integer".to_string(),
            })?;
            config.store_capacity = Some(parsed);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.default_fetch_policy = policy;
        self
    }

    pub fn with_unresolved_variables(mut self, policy: UnresolvedVariablePolicy) -> Self {
        self.unresolved_variables = policy;
        self
    }

    pub fn with_store_capacity(mut self, capacity: usize) -> Self {
        self.store_capacity = Some(capacity);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> QuiverResult<()> {
        if self.store_capacity == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "store_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuiverError;

    #[test]
    fn test_fetch_policy_parse_roundtrip() {
        for policy in [
            FetchPolicy::CacheOnly,
            FetchPolicy::CacheFirst,
            FetchPolicy::NetworkOnly,
            FetchPolicy::NetworkFirst,
            FetchPolicy::CacheAndNetwork,
        ] {
            assert_eq!(policy.to_string().parse::<FetchPolicy>().unwrap(), policy);
        }
        assert_eq!("NETWORK_ONLY".parse::<FetchPolicy>().unwrap(), FetchPolicy::NetworkOnly);
        assert!("sometimes".parse::<FetchPolicy>().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_fetch_policy(FetchPolicy::NetworkFirst)
            .with_unresolved_variables(UnresolvedVariablePolicy::Strict)
            .with_store_capacity(500);
        assert_eq!(config.default_fetch_policy, FetchPolicy::NetworkFirst);
        assert_eq!(config.unresolved_variables, UnresolvedVariablePolicy::Strict);
        assert_eq!(config.store_capacity, Some(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_capacity() {
        let config = ClientConfig::new().with_store_capacity(0);
        match config.validate() {
            Err(QuiverError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "store_capacity");
            }
            other => panic!("expected invalid store_capacity, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.default_fetch_policy, FetchPolicy::CacheFirst);
        assert_eq!(config.store_capacity, None);
    }
}
