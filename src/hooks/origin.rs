//! Source address filtering
//!
//! When `github_ips_only` is set, a delivery is accepted only if the caller's
//! address falls inside one of the ranges GitHub publishes for webhook
//! traffic (the `hooks` key of `https://api.github.com/meta`).
//!
//! The lookup is an injected [`AllowList`] so the request path never hardcodes
//! a network call:
//! - [`GithubMetaAllowList`] fetches the ranges with `reqwest` and caches them
//!   for a configurable TTL
//! - [`StaticAllowList`] holds a fixed set of ranges

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::HeaderMap;
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

/// Default GitHub metadata endpoint.
pub const DEFAULT_META_URL: &str = "https://api.github.com/meta";

/// Default allow-list cache lifetime (5 minutes).
pub const DEFAULT_ALLOWLIST_TTL_SECS: u64 = 300;

/// Timeout for the metadata fetch.
const META_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Origin filtering errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("address {0} is not in the allow-list")]
    Denied(IpAddr),

    #[error("failed to fetch allow-list: {0}")]
    Fetch(String),

    #[error("invalid network range: {0}")]
    InvalidRange(String),

    #[error("could not determine source address: {0}")]
    InvalidAddress(String),
}

/// A CIDR network range (`192.30.252.0/22`, `2a0a:a440::/29`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix: u8,
}

impl IpRange {
    /// Build a range, masking off any host bits in `network`.
    pub fn new(network: IpAddr, prefix: u8) -> Result<Self, OriginError> {
        let network = match network {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return Err(OriginError::InvalidRange(format!("{}/{}", network, prefix)));
                }
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & v4_mask(prefix)))
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return Err(OriginError::InvalidRange(format!("{}/{}", network, prefix)));
                }
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & v6_mask(prefix)))
            }
        };
        Ok(IpRange { network, prefix })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether `addr` lies inside this range.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match IPv4 ranges.
    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(ip) & v4_mask(self.prefix) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(ip) & v6_mask(self.prefix) == u128::from(net)
            }
            (IpAddr::V4(_), IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
                Some(v4) => self.contains(IpAddr::V4(v4)),
                None => false,
            },
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

fn v4_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn v6_mask(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

impl FromStr for IpRange {
    type Err = OriginError;

    /// Parse `addr/prefix`; a bare address is a single-host range.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network: IpAddr = addr
            .parse()
            .map_err(|_| OriginError::InvalidRange(s.to_string()))?;
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|_| OriginError::InvalidRange(s.to_string()))?,
            None if network.is_ipv4() => 32,
            None => 128,
        };
        IpRange::new(network, prefix)
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Parse a list of CIDR strings, failing on the first invalid entry.
pub fn parse_ranges<S: AsRef<str>>(ranges: &[S]) -> Result<Vec<IpRange>, OriginError> {
    ranges.iter().map(|r| r.as_ref().parse()).collect()
}

/// Capability answering "may this address deliver webhooks?"
#[async_trait]
pub trait AllowList: Send + Sync {
    async fn is_allowed(&self, addr: IpAddr) -> Result<bool, OriginError>;
}

/// Fixed set of allowed ranges.
#[derive(Debug, Clone, Default)]
pub struct StaticAllowList {
    ranges: Vec<IpRange>,
}

impl StaticAllowList {
    pub fn new(ranges: Vec<IpRange>) -> Self {
        StaticAllowList { ranges }
    }

    /// Build from CIDR strings.
    pub fn from_cidrs<S: AsRef<str>>(ranges: &[S]) -> Result<Self, OriginError> {
        Ok(StaticAllowList::new(parse_ranges(ranges)?))
    }
}

#[async_trait]
impl AllowList for StaticAllowList {
    async fn is_allowed(&self, addr: IpAddr) -> Result<bool, OriginError> {
        Ok(self.ranges.iter().any(|range| range.contains(addr)))
    }
}

/// Subset of the GitHub meta document we care about.
#[derive(Debug, Deserialize)]
struct MetaResponse {
    #[serde(default)]
    hooks: Vec<String>,
}

struct CachedRanges {
    ranges: Arc<Vec<IpRange>>,
    fetched_at: Instant,
}

/// Allow-list backed by GitHub's metadata endpoint.
pub struct GithubMetaAllowList {
    client: reqwest::Client,
    url: String,
    ttl: Option<Duration>,
    cache: RwLock<Option<CachedRanges>>,
}

impl fmt::Debug for GithubMetaAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubMetaAllowList")
            .field("url", &self.url)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl GithubMetaAllowList {
    /// Create an allow-list reading `url`. A zero `ttl` refetches on every
    /// lookup.
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(META_FETCH_TIMEOUT)
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        GithubMetaAllowList {
            client,
            url: url.into(),
            ttl: (!ttl.is_zero()).then_some(ttl),
            cache: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> Result<Vec<IpRange>, OriginError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| OriginError::Fetch(e.to_string()))?;
        if !response.status().is_success() {
            return Err(OriginError::Fetch(format!(
                "{} returned {}",
                self.url,
                response.status()
            )));
        }
        let meta: MetaResponse = response
            .json()
            .await
            .map_err(|e| OriginError::Fetch(e.to_string()))?;
        debug!(target: "origin", count = meta.hooks.len(), "Fetched webhook ranges");
        parse_ranges(&meta.hooks)
    }

    async fn ranges(&self) -> Result<Arc<Vec<IpRange>>, OriginError> {
        if let Some(ttl) = self.ttl {
            let cache = self.cache.read();
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.ranges.clone());
                }
            }
        }

        let ranges = Arc::new(self.fetch().await?);
        if self.ttl.is_some() {
            *self.cache.write() = Some(CachedRanges {
                ranges: ranges.clone(),
                fetched_at: Instant::now(),
            });
        }
        Ok(ranges)
    }
}

#[async_trait]
impl AllowList for GithubMetaAllowList {
    async fn is_allowed(&self, addr: IpAddr) -> Result<bool, OriginError> {
        let ranges = self.ranges().await?;
        Ok(ranges.iter().any(|range| range.contains(addr)))
    }
}

/// Determine the caller's address: first `X-Forwarded-For` hop, else the
/// TCP peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<IpAddr, OriginError> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        let raw = xff
            .to_str()
            .map_err(|_| OriginError::InvalidAddress("non-ASCII X-Forwarded-For".to_string()))?;
        let first = raw.split(',').next().unwrap_or("").trim();
        return first
            .parse::<IpAddr>()
            .map_err(|_| OriginError::InvalidAddress(first.to_string()));
    }
    peer.map(|addr| addr.ip())
        .ok_or_else(|| OriginError::InvalidAddress("no peer address".to_string()))
}

/// Reject `addr` unless the allow-list accepts it.
pub async fn check_origin(allow_list: &dyn AllowList, addr: IpAddr) -> Result<(), OriginError> {
    if allow_list.is_allowed(addr).await? {
        Ok(())
    } else {
        error!(target: "origin", ip = %addr, "IP not allowed");
        Err(OriginError::Denied(addr))
    }
}
