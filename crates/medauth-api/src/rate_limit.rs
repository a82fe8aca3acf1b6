//! Per-client rate limiting
//!
//! A [`RateLimitPolicy`] `{max_calls, window}` becomes a keyed GCRA limiter
//! that allows bursts of up to `max_calls` and refills one call every
//! `window / max_calls`. The key is the socket peer address, or the
//! forwarded client address when the peer is a trusted proxy. The host must
//! serve with `into_make_service_with_connect_info::<SocketAddr>()`; requests
//! without a peer address share a single bucket.
//!
//! Policies are attached where routes are registered:
//!
//! ```ignore
//! let login = with_rate_limit(
//!     Router::new().route("/login", post(login)),
//!     config.rate_limits.login,
//!     &config.rate_limits.trusted_proxies,
//! );
//! ```

use crate::context::resolve_client_ip;
use crate::error::AppError;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter as Governor,
};
use medauth_auth::audit::{audit_log, AuditEvent};
use medauth_core::RateLimitPolicy;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type KeyedGovernor = Governor<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Key used when the client address cannot be determined
const UNKNOWN_CLIENT: &str = "unknown";

/// How often idle client state is dropped
pub const PURGE_INTERVAL: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    policy: RateLimitPolicy,
    trusted_proxies: Vec<IpAddr>,
    limiter: KeyedGovernor,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        let burst = NonZeroU32::new(policy.max_calls).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(policy.window() / burst.get())
            .map(|quota| quota.allow_burst(burst))
            .unwrap_or_else(|| Quota::per_second(burst));

        Self {
            policy,
            trusted_proxies: Vec::new(),
            limiter: Governor::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: &[IpAddr]) -> Self {
        self.trusted_proxies = proxies.to_vec();
        self
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Limiter key for a request from `peer`
    pub fn client_key(&self, peer: Option<IpAddr>, headers: &HeaderMap) -> String {
        resolve_client_ip(peer, headers, &self.trusted_proxies)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }

    /// `Err(seconds)` until the next call for `key` is allowed
    pub fn check(&self, key: &str) -> Result<(), u64> {
        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            wait.as_secs() + u64::from(wait.subsec_nanos() > 0)
        })
    }

    /// Number of clients with limiter state
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Drop state for keys that are back at full capacity
    pub fn purge_idle(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Purge idle keys every `every` until the limiter is dropped
    pub fn spawn_purge(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                ticks.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.purge_idle();
                debug!(clients = limiter.tracked_clients(), "Purged idle rate limit state");
            }
        })
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let key = limiter.client_key(peer, request.headers());

    if let Err(retry_after_secs) = limiter.check(&key) {
        let policy = limiter.policy();
        warn!(
            path = %request.uri().path(),
            client = %key,
            max_calls = policy.max_calls,
            window_secs = policy.window_secs,
            "Rate limit exceeded"
        );
        audit_log(&AuditEvent::RateLimited {
            path: request.uri().path().to_string(),
            key,
            max_calls: policy.max_calls,
            window_secs: policy.window_secs,
        });
        return AppError::RateLimited { retry_after_secs }.into_response();
    }

    next.run(request).await
}

/// Attach a fresh limiter for `policy` to every route in `router`.
///
/// Inside a tokio runtime the limiter also gets a purge task that ends when
/// the router is dropped.
pub fn with_rate_limit<S>(
    router: Router<S>,
    policy: RateLimitPolicy,
    trusted_proxies: &[IpAddr],
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let limiter = Arc::new(RateLimiter::new(policy).with_trusted_proxies(trusted_proxies));
    if tokio::runtime::Handle::try_current().is_ok() {
        limiter.spawn_purge(PURGE_INTERVAL);
    } else {
        warn!("No tokio runtime, idle rate limit state will not be purged");
    }
    router.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
}
