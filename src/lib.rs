//! Session authority library.
//!
//! Issues and validates tenant-scoped RS256 session tokens signed by a
//! rotating key set, and bridges OAuth redirects through single-use
//! challenge exchange.

#![forbid(unsafe_code)]

pub mod authority;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod jwt;
pub mod keys;
pub mod metrics;
pub mod pkce;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod tracing_config;

// Re-exports for convenience
pub use authority::{OAuthHandoff, SessionAuthority};
pub use config::Config;
pub use error::{AuthError, StoreError, TokenRejection};
