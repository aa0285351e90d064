//! Auth state and configuration shared by every handler.

use argon2::Params;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    auth::{
        lockout::{DEFAULT_LOCKOUT_WINDOW, DEFAULT_MAX_ATTEMPTS},
        csrf::DEFAULT_GRANT_TTL,
        AuthService, CredentialStore, CsrfGuard, FederatedVerifier, KvRateLimiter, LoginGuard,
        RateLimitConfig, RateLimiter, SessionRegistry, TokenIssuer, TokenLifetimes,
        VerificationTokens,
    },
    email::Notifier,
    kv::KvStore,
    store::AuthStore,
};

const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    session_retention: Duration,
    lifetimes: TokenLifetimes,
    lockout_max_attempts: u32,
    lockout_window: Duration,
    csrf_ttl: Duration,
    rate_limits: RateLimitConfig,
    trust_proxy_headers: bool,
    password_params: Params,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            session_retention: DEFAULT_SESSION_RETENTION,
            lifetimes: TokenLifetimes::default(),
            lockout_max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_window: DEFAULT_LOCKOUT_WINDOW,
            csrf_ttl: DEFAULT_GRANT_TTL,
            rate_limits: RateLimitConfig::default(),
            trust_proxy_headers: false,
            password_params: Params::default(),
        }
    }

    #[must_use]
    pub fn with_session_retention_seconds(mut self, seconds: u64) -> Self {
        self.session_retention = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_lifetimes(mut self, lifetimes: TokenLifetimes) -> Self {
        self.lifetimes = lifetimes;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, max_attempts: u32, window_seconds: u64) -> Self {
        self.lockout_max_attempts = max_attempts;
        self.lockout_window = Duration::from_secs(window_seconds);
        self
    }

    #[must_use]
    pub fn with_csrf_ttl_seconds(mut self, seconds: u64) -> Self {
        self.csrf_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    /// Key rate limits on `X-Forwarded-For`/`X-Real-IP` instead of the socket peer.
    /// Only safe when every request arrives through a proxy that sets them.
    #[must_use]
    pub fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub fn with_password_params(mut self, params: Params) -> Self {
        self.password_params = params;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Cookies only carry `Secure` when the frontend itself is served over https.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }

    #[must_use]
    pub fn session_retention(&self) -> Duration {
        self.session_retention
    }

    #[must_use]
    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    #[must_use]
    pub fn lockout_max_attempts(&self) -> u32 {
        self.lockout_max_attempts
    }

    #[must_use]
    pub fn lockout_window(&self) -> Duration {
        self.lockout_window
    }

    #[must_use]
    pub fn csrf_ttl(&self) -> Duration {
        self.csrf_ttl
    }

    #[must_use]
    pub fn rate_limits(&self) -> RateLimitConfig {
        self.rate_limits
    }

    #[must_use]
    pub fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }
}

/// Dependencies handed to [`AuthState::new`]. Everything else is derived from
/// [`AuthConfig`].
pub struct AuthDeps {
    pub store: Arc<dyn AuthStore>,
    pub kv: Arc<dyn KvStore>,
    pub issuer: TokenIssuer,
    pub notifier: Arc<dyn Notifier>,
    pub federated: Arc<dyn FederatedVerifier>,
}

pub struct AuthState {
    config: AuthConfig,
    service: AuthService,
    csrf: CsrfGuard,
    rate_limiter: Arc<dyn RateLimiter>,
    store: Arc<dyn AuthStore>,
    kv: Arc<dyn KvStore>,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, deps: AuthDeps) -> Self {
        let AuthDeps {
            store,
            kv,
            issuer,
            notifier,
            federated,
        } = deps;

        let service = AuthService::new(
            CredentialStore::new(Arc::clone(&store), config.password_params.clone()),
            VerificationTokens::new(Arc::clone(&store)),
            SessionRegistry::new(Arc::clone(&store), config.session_retention()),
            issuer,
            LoginGuard::new(
                Arc::clone(&kv),
                config.lockout_max_attempts(),
                config.lockout_window(),
            ),
            notifier,
        )
        .with_federated_verifier(federated)
        .with_lifetimes(config.lifetimes());

        let csrf = CsrfGuard::new(Arc::clone(&kv), config.csrf_ttl());
        let rate_limiter = Arc::new(KvRateLimiter::new(Arc::clone(&kv), config.rate_limits()));

        Self {
            config,
            service,
            csrf,
            rate_limiter,
            store,
            kv,
        }
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn service(&self) -> &AuthService {
        &self.service
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }
}
