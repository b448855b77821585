//! Test utilities for the Consult session orchestrator.
//!
//! Provides in-memory stand-ins for the three external collaborators of a
//! consultation session plus fixtures for spawning one:
//!
//! - [`FakeEngine`] - media engine client with scripted failures, gates, and an op log
//! - [`FakeCapture`] / [`FakeTrack`] - capture devices that count every open and close
//! - [`FakeMessageStore`] - message store with a controllable server-side log
//! - [`fixtures`] - identities, a [`fixtures::TestSession`] harness, and wait helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use consult_test_utils::fixtures::TestSession;
//!
//! let session = TestSession::spawn();
//! session.start_connected().await;
//! assert_eq!(session.capture.open_tracks().len(), 2);
//! ```

pub mod fake_capture;
pub mod fake_engine;
pub mod fake_messages;
pub mod fixtures;
mod gate;

pub use fake_capture::{FakeCapture, FakeTrack};
pub use fake_engine::{EngineOp, FakeEngine};
pub use fake_messages::FakeMessageStore;
