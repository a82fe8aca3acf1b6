//! medauth Auth - session tokens, one-time tokens and account flows
//!
//! - [`jwt::TokenIssuer`]: access/refresh pair lifecycle over the fast cache
//!   and durable store
//! - [`hybrid::HybridTokenService`]: password reset and email verification
//!   tokens
//! - [`account::AccountService`]: registration, login lockout, recovery and
//!   session management flows
//! - [`audit`]: structured security audit events

pub mod account;
pub mod audit;
pub mod hybrid;
pub mod jwt;
pub mod password;

pub use account::{AccountService, LoginOutcome, Registration};
pub use audit::{audit_log, AuditEvent};
pub use hybrid::{generate_secure_token, hash_token, HybridTokenService};
pub use jwt::{Claims, TokenIssuer, TokenPair, TokenType};
pub use password::{PasswordConfig, PasswordError, PasswordHasher};

use medauth_core::{AppConfig, SessionSecrets};
use medauth_store::{DurableStore, FastCache};
use std::sync::Arc;

/// All auth services wired over one cache and one durable store
#[derive(Clone)]
pub struct AuthServices {
    pub issuer: Arc<TokenIssuer>,
    pub tokens: Arc<HybridTokenService>,
    pub accounts: Arc<AccountService>,
}

impl AuthServices {
    pub fn new(
        cache: Arc<dyn FastCache>,
        store: Arc<dyn DurableStore>,
        secrets: &SessionSecrets,
        config: &AppConfig,
        hasher: PasswordHasher,
    ) -> Self {
        let issuer = Arc::new(TokenIssuer::new(
            cache.clone(),
            store.clone(),
            secrets,
            config.tokens.clone(),
        ));
        let tokens = Arc::new(HybridTokenService::new(
            cache.clone(),
            store.clone(),
            config.tokens.clone(),
        ));
        let accounts = Arc::new(AccountService::new(
            store,
            cache,
            issuer.clone(),
            tokens.clone(),
            hasher,
            config.security.clone(),
        ));

        Self {
            issuer,
            tokens,
            accounts,
        }
    }
}
