//! Read policies.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a read request trades freshness against latency and connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CachePolicy {
    /// Serve only what is cached; never touch the network.
    CacheOnly,
    /// Skip the persistent tier and fetch.
    NetworkOnly,
    /// Serve cached data, refreshing stale data in the background while online.
    #[default]
    CacheFirst,
    /// Fetch unless cached data is still within its TTL; fall back to stale
    /// data when the fetch fails.
    NetworkFirst,
    /// Serve stale data immediately and always revalidate it in the background.
    StaleWhileRevalidate,
}

impl CachePolicy {
    /// Whether the policy ever reads the persistent tier.
    pub fn reads_persistent(self) -> bool {
        !matches!(self, Self::NetworkOnly)
    }

    /// Whether the policy may fetch synchronously when nothing usable is cached.
    pub fn allows_network(self) -> bool {
        !matches!(self, Self::CacheOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CacheOnly => "cache_only",
            Self::NetworkOnly => "network_only",
            Self::CacheFirst => "cache_first",
            Self::NetworkFirst => "network_first",
            Self::StaleWhileRevalidate => "stale_while_revalidate",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = ConfigError;

    /// Accepts snake_case, kebab-case or camelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "cacheonly" => Ok(Self::CacheOnly),
            "networkonly" => Ok(Self::NetworkOnly),
            "cachefirst" => Ok(Self::CacheFirst),
            "networkfirst" => Ok(Self::NetworkFirst),
            "stalewhilerevalidate" | "swr" => Ok(Self::StaleWhileRevalidate),
            _ => Err(ConfigError::InvalidValue {
                field: "default_policy".to_string(),
                value: s.to_string(),
                reason: "unknown cache policy".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_cache_first() {
        assert_eq!(CachePolicy::default(), CachePolicy::CacheFirst);
    }

    #[test]
    fn test_parse_spellings() {
        assert_eq!("cache_only".parse::<CachePolicy>(), Ok(CachePolicy::CacheOnly));
        assert_eq!("networkFirst".parse::<CachePolicy>(), Ok(CachePolicy::NetworkFirst));
        assert_eq!(
            "stale-while-revalidate".parse::<CachePolicy>(),
            Ok(CachePolicy::StaleWhileRevalidate)
        );
        assert!("sometimes".parse::<CachePolicy>().is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        for policy in [
            CachePolicy::CacheOnly,
            CachePolicy::NetworkOnly,
            CachePolicy::CacheFirst,
            CachePolicy::NetworkFirst,
            CachePolicy::StaleWhileRevalidate,
        ] {
            assert_eq!(policy.to_string().parse::<CachePolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_tier_permissions() {
        assert!(!CachePolicy::NetworkOnly.reads_persistent());
        assert!(CachePolicy::CacheOnly.reads_persistent());
        assert!(!CachePolicy::CacheOnly.allows_network());
        assert!(CachePolicy::StaleWhileRevalidate.allows_network());
    }
}
