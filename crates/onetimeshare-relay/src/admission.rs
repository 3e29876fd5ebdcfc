//! Fixed-window admission control
//!
//! Counters are kept per `(client identity, endpoint)` in a concurrent map, so
//! each key is updated atomically without a global lock. Counters live in this
//! process only: horizontally scaled instances each enforce their own window.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{AdmissionConfig, RateLimitConfig};
use crate::error::{RelayError, Result};

/// Rate-limited operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Secret creation
    Create,
    /// Secret read
    Read,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Create => write!(f, "create"),
            Endpoint::Read => write!(f, "read"),
        }
    }
}

/// Who a request is accounted to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Derive the identity of a request.
    ///
    /// With a trusted proxy in front, the first address of the forwarded-for
    /// header is the original client (proxies append). Otherwise, or when the
    /// header is blank, the transport peer is used.
    pub fn resolve(forwarded_for: Option<&str>, peer: IpAddr, trust_forwarded_for: bool) -> Self {
        if trust_forwarded_for {
            if let Some(first) = forwarded_for.and_then(|v| v.split(',').next()) {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Self(trimmed.to_string());
                }
            }
        }
        Self(peer.to_string())
    }

    /// Identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientIdentity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Per-client, per-endpoint fixed-window rate limiter
pub struct AdmissionController {
    create: RateLimitConfig,
    read: RateLimitConfig,
    trust_forwarded_for: bool,
    forwarded_for_header: String,
    windows: DashMap<(ClientIdentity, Endpoint), Window>,
}

impl AdmissionController {
    /// Create a controller from configuration
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            create: config.create.clone(),
            read: config.read.clone(),
            trust_forwarded_for: config.trust_forwarded_for,
            forwarded_for_header: config.forwarded_for_header.clone(),
            windows: DashMap::new(),
        }
    }

    /// Resolve a request's identity under this controller's proxy policy
    pub fn identify(&self, forwarded_for: Option<&str>, peer: IpAddr) -> ClientIdentity {
        ClientIdentity::resolve(forwarded_for, peer, self.trust_forwarded_for)
    }

    /// Resolve a request's identity from its raw headers.
    ///
    /// The configured forwarded-for header is matched case-insensitively.
    pub fn identify_from_headers<'a, I>(&self, headers: I, peer: IpAddr) -> ClientIdentity
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let forwarded_for = headers
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&self.forwarded_for_header))
            .map(|(_, value)| value);
        self.identify(forwarded_for, peer)
    }

    fn limit(&self, endpoint: Endpoint) -> &RateLimitConfig {
        match endpoint {
            Endpoint::Create => &self.create,
            Endpoint::Read => &self.read,
        }
    }

    /// Admit or reject one request.
    ///
    /// A rejected request does not count against the window.
    pub fn check(&self, identity: &ClientIdentity, endpoint: Endpoint) -> Result<()> {
        let limit = self.limit(endpoint);
        let window = limit.window();
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry((identity.clone(), endpoint))
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit.max_requests {
            let remaining = window.saturating_sub(now.duration_since(entry.started));
            let retry_after_secs = ceil_secs(remaining).max(1);
            info!(client = %identity, %endpoint, retry_after_secs, "rate limited");
            return Err(RelayError::RateLimited { retry_after_secs });
        }

        entry.count += 1;
        debug!(client = %identity, %endpoint, count = entry.count, "admitted");
        Ok(())
    }

    /// Drop windows that have rolled over; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|(_, endpoint), w| {
            now.duration_since(w.started) < self.limit(*endpoint).window()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Longest configured window, a natural purge period
    pub fn purge_interval(&self) -> Duration {
        self.create.window().max(self.read.window())
    }

    /// Number of tracked windows
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Periodically purge rolled-over windows
    pub fn spawn_purge_task(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = self.purge_expired();
                if removed > 0 {
                    debug!("Purged {} rate-limit windows", removed);
                }
            }
        })
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
