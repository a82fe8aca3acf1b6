//! medauth Core - Domain models, configuration and shared error types
//!
//! This crate defines the types shared by every other medauth crate:
//! - Identity models (users, sessions, one-time recovery tokens)
//! - The authentication error taxonomy
//! - Configuration management and startup secret resolution
//! - Input validators and the user-agent device classifier

pub mod config;
pub mod device;
pub mod error;
pub mod models;
pub mod secrets;
pub mod validators;

pub use config::{
    AppConfig, CacheConfig, ConfigError, DatabaseConfig, Environment, LoggingConfig,
    RateLimitConfig, RateLimitPolicy, SecurityConfig, TokenConfig,
};
pub use device::DeviceKind;
pub use error::{AuthError, AuthResult};
pub use models::{
    ClientContext, OneTimeToken, OneTimeTokenKind, Session, User, UserRole, UserStatus,
};
pub use secrets::{
    EnvSecretProvider, SecretError, SecretProvider, SessionSecrets, StaticSecretProvider,
};
