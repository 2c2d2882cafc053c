//! # Utility Modules
//!
//! Supporting utilities for session cryptography, logging and metrics.
//!
//! ## Components
//! - **Crypto**: pluggable session ciphers (XChaCha20-Poly1305, AES-256-CBC) and key derivation
//! - **Logging**: `tracing-subscriber` setup from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Nonces and IVs come from the OS RNG
//! - Session secrets are zeroized on drop (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
