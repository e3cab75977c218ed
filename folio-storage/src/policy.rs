//! Read planning.
//!
//! [`plan_read`] is the decision table behind `CacheService::fetch` once the
//! memory tier has missed. It is pure: the service reports what the
//! persistent tier holds and whether the device is online, and the plan says
//! what to serve and whether to touch the network.
//!
//! A memory hit is always served as fresh and never reaches this table. The
//! persistent tier beats the network whenever its data is within TTL.

use folio_core::CachePolicy;

/// What the persistent tier holds for a key after a memory miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// A value in the persistent tier.
    Persistent { stale: bool },
    /// Nothing usable.
    Absent,
}

/// How to answer a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPlan {
    /// Serve the persistent value, fresh or stale, without a network call.
    ServeCached { stale: bool },
    /// Serve the stale persistent value now and refresh it in the background.
    ServeStaleAndRefresh,
    /// Fetch synchronously. On failure, fall back to the stale persistent
    /// value if `fallback_stale`.
    FetchNetwork { fallback_stale: bool },
    /// Nothing to serve and no fetch allowed.
    Unavailable,
}

/// Decide how to answer a read.
pub fn plan_read(policy: CachePolicy, lookup: CacheLookup, online: bool) -> ReadPlan {
    match lookup {
        // network-only never reads the persistent tier
        CacheLookup::Persistent { .. } if !policy.reads_persistent() => fetch_or_unavailable(online),

        CacheLookup::Persistent { stale: false } => ReadPlan::ServeCached { stale: false },

        CacheLookup::Persistent { stale: true } => match policy {
            CachePolicy::CacheOnly => ReadPlan::ServeCached { stale: true },
            CachePolicy::StaleWhileRevalidate | CachePolicy::CacheFirst if online => {
                ReadPlan::ServeStaleAndRefresh
            }
            CachePolicy::NetworkFirst if online => ReadPlan::FetchNetwork {
                fallback_stale: true,
            },
            _ => ReadPlan::ServeCached { stale: true },
        },

        CacheLookup::Absent if policy.allows_network() => fetch_or_unavailable(online),
        CacheLookup::Absent => ReadPlan::Unavailable,
    }
}

fn fetch_or_unavailable(online: bool) -> ReadPlan {
    if online {
        ReadPlan::FetchNetwork {
            fallback_stale: false,
        }
    } else {
        ReadPlan::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CachePolicy; 5] = [
        CachePolicy::CacheOnly,
        CachePolicy::NetworkOnly,
        CachePolicy::CacheFirst,
        CachePolicy::NetworkFirst,
        CachePolicy::StaleWhileRevalidate,
    ];

    #[test]
    fn test_fresh_persistent_never_touches_network() {
        for policy in ALL {
            if policy == CachePolicy::NetworkOnly {
                continue;
            }
            assert_eq!(
                plan_read(policy, CacheLookup::Persistent { stale: false }, true),
                ReadPlan::ServeCached { stale: false }
            );
        }
    }

    #[test]
    fn test_cache_only_without_data_is_unavailable() {
        assert_eq!(
            plan_read(CachePolicy::CacheOnly, CacheLookup::Absent, true),
            ReadPlan::Unavailable
        );
    }

    #[test]
    fn test_stale_data_online() {
        let stale = CacheLookup::Persistent { stale: true };
        assert_eq!(
            plan_read(CachePolicy::CacheOnly, stale, true),
            ReadPlan::ServeCached { stale: true }
        );
        assert_eq!(
            plan_read(CachePolicy::CacheFirst, stale, true),
            ReadPlan::ServeStaleAndRefresh
        );
        assert_eq!(
            plan_read(CachePolicy::StaleWhileRevalidate, stale, true),
            ReadPlan::ServeStaleAndRefresh
        );
        assert_eq!(
            plan_read(CachePolicy::NetworkFirst, stale, true),
            ReadPlan::FetchNetwork {
                fallback_stale: true
            }
        );
        assert_eq!(
            plan_read(CachePolicy::NetworkOnly, stale, true),
            ReadPlan::FetchNetwork {
                fallback_stale: false
            }
        );
    }

    #[test]
    fn test_stale_data_offline_is_served_without_refresh() {
        let stale = CacheLookup::Persistent { stale: true };
        for policy in [
            CachePolicy::CacheOnly,
            CachePolicy::CacheFirst,
            CachePolicy::NetworkFirst,
            CachePolicy::StaleWhileRevalidate,
        ] {
            assert_eq!(
                plan_read(policy, stale, false),
                ReadPlan::ServeCached { stale: true }
            );
        }
        assert_eq!(
            plan_read(CachePolicy::NetworkOnly, stale, false),
            ReadPlan::Unavailable
        );
    }

    #[test]
    fn test_absent_data() {
        for policy in [
            CachePolicy::NetworkOnly,
            CachePolicy::CacheFirst,
            CachePolicy::NetworkFirst,
            CachePolicy::StaleWhileRevalidate,
        ] {
            assert_eq!(
                plan_read(policy, CacheLookup::Absent, true),
                ReadPlan::FetchNetwork {
                    fallback_stale: false
                }
            );
            assert_eq!(
                plan_read(policy, CacheLookup::Absent, false),
                ReadPlan::Unavailable
            );
        }
    }
}
