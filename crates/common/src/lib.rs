//! Common utilities and types shared across Consult components.

#![warn(clippy::pedantic)]

/// Module for identifier types shared by the session and its collaborators
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;
