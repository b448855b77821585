//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use these types
//! for every credential a consultation session carries: the media engine
//! join token and the bearer token presented to the messaging service.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one gets safe logging behavior for free.
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct JoinCredentials {
//!     channel_name: String,
//!     token: SecretString,
//! }
//!
//! let creds = JoinCredentials {
//!     channel_name: "consult-42".to_string(),
//!     token: SecretString::from("006abc"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("006abc"));
//! assert_eq!(creds.token.expose_secret(), "006abc");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
