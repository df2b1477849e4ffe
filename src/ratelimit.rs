//! Per-IP request limiting at the HTTP boundary.
//!
//! Counting happens in an external store behind [`RateLimiter`]; this
//! module decides which address a request is charged to and under which
//! key.

use ipnet::IpNet;
use once_cell::sync::Lazy;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::Config;

/// Token-style limiter backed by a shared counter store.
pub trait RateLimiter: Send + Sync {
    /// Take one request for `key`; `false` when `limit` is exhausted.
    fn allow(&self, key: &str, limit: u64) -> bool;
}

/// Networks that are never limited: non-unicast, loopback, link-local and
/// private ranges.
static EXEMPT_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "0.0.0.0/32",
        "10.0.0.0/8",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "224.0.0.0/4",
        "255.255.255.255/32",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
        "ff00::/8",
    ]
    .iter()
    .filter_map(|s| s.parse().ok())
    .collect()
});

/// Address a request is charged to: the first `X-Forwarded-For` entry
/// when the header is present, the peer address otherwise.
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<IpAddr> {
    match forwarded_for.map(str::trim).filter(|h| !h.is_empty()) {
        Some(header) => header.split(',').next()?.trim().parse().ok(),
        None => peer,
    }
}

/// Whether requests from `ip` count against a limit (public unicast only).
pub fn is_limited_address(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    !EXEMPT_NETS.iter().any(|net| net.contains(&ip))
}

/// Counter key for one client address.
pub fn rate_limit_key(name: &str, ip: &IpAddr) -> String {
    format!("{}:rate_limit:ip:{}", name, ip)
}

/// Per-IP gate applied before lookups.
#[derive(Clone)]
pub struct IpRateLimit {
    name: String,
    limit_per_ip: u64,
    limiter: Arc<dyn RateLimiter>,
}

impl IpRateLimit {
    pub fn new(name: &str, limit_per_ip: u64, limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            name: name.to_string(),
            limit_per_ip,
            limiter,
        }
    }

    /// Build the gate from config; `None` when limiting is off or no
    /// counter store is available.
    pub fn from_config(config: &Config, limiter: Option<Arc<dyn RateLimiter>>) -> Option<Self> {
        let limit = config.rate_limit.limit_per_ip;
        if limit == 0 {
            return None;
        }
        match limiter {
            Some(limiter) => Some(Self::new(&config.name, limit, limiter)),
            None => {
                let store = config.redis.as_ref().map_or("none", |r| r.host.as_str());
                log::warn!(
                    "rate_limit.limit_per_ip is {} but no rate limit store is wired \
                     (redis: {}), per-IP limiting disabled",
                    limit,
                    store
                );
                None
            }
        }
    }

    /// Whether the request may proceed.
    pub fn check(&self, forwarded_for: Option<&str>, peer: Option<IpAddr>) -> bool {
        let Some(ip) = client_ip(forwarded_for, peer) else {
            return true;
        };
        if !is_limited_address(ip) {
            return true;
        }
        let allowed = self
            .limiter
            .allow(&rate_limit_key(&self.name, &ip), self.limit_per_ip);
        if !allowed {
            log::warn!("limit exceeded, ip: {}", ip);
        }
        allowed
    }
}
