//! Session Controller.
//!
//! [`SessionHandle`] is the entry contract exposed to the surrounding
//! application; it drives a `SessionActor` task that owns every session
//! resource and is the only writer of [`SessionState`](crate::state::SessionState).
//!
//! # Start sequence
//!
//! 1. acquire microphone and camera (failure: `Failed`, engine never joined)
//! 2. join the engine (failure: local tracks released, `Failed`)
//! 3. publish local tracks
//! 4. start the registry task on the engine event channel
//! 5. start the chat synchronizer
//! 6. `Connected`
//!
//! The event sink is registered with the engine client just before the join
//! so events for participants already in the channel queue up until the
//! registry task starts consuming them.
//!
//! # Teardown
//!
//! Explicit `leave()`, a fatal error, and dropping the last handle all end in
//! the same routine, which runs at most once per session:
//!
//! 1. cancel the session token and stop the chat synchronizer
//! 2. unpublish and release local tracks
//! 3. stop the registry task (drops remote subscriptions)
//! 4. clear the event sink and leave the engine, if joined
//! 5. transition to `Ended` or `Failed`
//!
//! A failing step is logged and counted; the remaining steps still run.

mod actor;
mod handle;
mod messages;

pub use handle::SessionHandle;
pub use messages::{SessionFailure, SessionSnapshot};

use crate::chat::MessageStore;
use crate::engine::MediaEngine;
use crate::media::CaptureDevices;

use common::secret::SecretString;
use common::types::{ConsultationId, ParticipantId};
use std::sync::Arc;

/// Who is joining which consultation.
///
/// `Debug` output never includes the auth token.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    /// Consultation record id (chat is scoped to it).
    pub consultation_id: ConsultationId,
    /// Media engine application id.
    pub engine_app_id: String,
    /// Engine channel to join.
    pub channel_name: String,
    /// Token presented to the engine on join.
    pub auth_token: SecretString,
    /// Local participant id (engine uid, chat sender id).
    pub local_participant_id: ParticipantId,
    /// Display name attached to optimistic chat entries.
    pub local_display_name: String,
}

/// The three external collaborators.
#[derive(Clone)]
pub struct SessionDeps {
    /// Media engine.
    pub engine: Arc<dyn MediaEngine>,
    /// Capture devices.
    pub capture: Arc<dyn CaptureDevices>,
    /// Message store.
    pub messages: Arc<dyn MessageStore>,
}
