//! Consult Session Library
//!
//! Live consultation session orchestrator: one real-time audio/video call plus
//! its text channel for the duration of a clinical consultation.
//!
//! - Drives an explicit session state machine (`Idle → Connecting → Connected → Ended|Failed`)
//! - Owns local capture tracks exclusively; every acquired track is closed exactly once
//! - Projects media engine events onto a remote participant registry
//! - Polls the consultation chat and reconciles optimistic sends by correlation id
//! - Converges every exit path (leave, fatal error, dropped handle) on one teardown
//!
//! # Architecture
//!
//! ```text
//! SessionHandle (cloneable, public entry contract)
//! └── SessionActor (one per session, root CancellationToken)
//!     ├── LocalMedia (camera / microphone / screen tracks)
//!     ├── EngineAdapter (external media engine client)
//!     ├── RegistryTask (engine events → remote participants)
//!     └── ChatSynchronizer (child token, polling + sends)
//! ```
//!
//! The media engine, the capture devices, and the message store are external
//! collaborators behind the [`engine::EngineClient`], [`media::CaptureDevices`],
//! and [`chat::MessageStore`] traits. No automatic reconnection or retry
//! happens anywhere in this crate.
//!
//! # Modules
//!
//! - [`session`] - Session Controller and its public handle
//! - [`media`] - Local Media Manager and the capture contract
//! - [`registry`] - Remote Participant Registry
//! - [`chat`] - Chat log, synchronizer, and HTTP message store
//! - [`engine`] - Media Engine Adapter
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error taxonomy

pub mod chat;
pub mod config;
pub mod engine;
pub mod errors;
pub mod media;
pub mod observability;
pub mod registry;
pub mod session;
pub mod state;
