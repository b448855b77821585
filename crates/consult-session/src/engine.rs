//! Media Engine Adapter.
//!
//! Typed wrapper around the external real-time media client. The adapter owns
//! no session logic: it forwards calls, maps [`EngineError`]s onto the
//! [`SessionError`] variant naming the failed step, and logs.
//!
//! Engine events are delivered through an unbounded channel registered with
//! [`EngineClient::set_event_sink`]. The session registers the sink before
//! joining so that no `user-published` for an already-present participant is
//! lost, and the registry task consumes the channel once it is running.

use crate::errors::{EngineError, SessionError};
use crate::media::{TrackHandle, TrackKind};

use async_trait::async_trait;
use common::secret::SecretString;
use common::types::ParticipantId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted by the engine client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A remote participant joined the channel.
    UserJoined(ParticipantId),
    /// A remote participant left the channel.
    UserLeft(ParticipantId),
    /// A remote participant published a track of `kind`.
    UserPublished {
        /// Remote participant.
        participant_id: ParticipantId,
        /// Published track kind.
        kind: TrackKind,
    },
    /// A remote participant stopped publishing a track of `kind`.
    UserUnpublished {
        /// Remote participant.
        participant_id: ParticipantId,
        /// Unpublished track kind.
        kind: TrackKind,
    },
}

/// Sending half of the engine event channel.
pub type EngineEventSink = mpsc::UnboundedSender<EngineEvent>;

/// Receiving half of the engine event channel.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Client for one engine connection.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Join `channel` as `uid`.
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &SecretString,
        uid: &ParticipantId,
    ) -> Result<(), EngineError>;

    /// Leave the channel.
    async fn leave(&self) -> Result<(), EngineError>;

    /// Publish local tracks.
    async fn publish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), EngineError>;

    /// Unpublish local tracks.
    async fn unpublish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), EngineError>;

    /// Subscribe to a remote participant's track.
    async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<Arc<dyn TrackHandle>, EngineError>;

    /// Drop a subscription made with [`Self::subscribe`].
    async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<(), EngineError>;

    /// Register (or clear) the event sink. Events are dropped while no sink is set.
    fn set_event_sink(&self, sink: Option<EngineEventSink>);
}

/// Factory for engine clients.
pub trait MediaEngine: Send + Sync {
    /// Create a client for one session.
    fn create_client(&self) -> Arc<dyn EngineClient>;
}

/// Adapter around one [`EngineClient`].
///
/// Cheap to clone; the registry task holds a clone for subscribe calls.
#[derive(Clone)]
pub struct EngineAdapter {
    client: Arc<dyn EngineClient>,
}

impl EngineAdapter {
    /// Create a client from `engine` and wrap it.
    #[must_use]
    pub fn new(engine: &dyn MediaEngine) -> Self {
        Self {
            client: engine.create_client(),
        }
    }

    /// Register the event sink and return the receiving side.
    #[must_use]
    pub fn attach_events(&self) -> EngineEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.client.set_event_sink(Some(tx));
        rx
    }

    /// Clear the event sink.
    pub fn detach_events(&self) {
        self.client.set_event_sink(None);
    }

    /// Join the engine channel.
    pub async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: &SecretString,
        uid: &ParticipantId,
    ) -> Result<(), SessionError> {
        self.client
            .join(app_id, channel, token, uid)
            .await
            .map_err(|e| {
                warn!(
                    target: "consult.engine",
                    channel = %channel,
                    error = %e,
                    "Engine join failed"
                );
                SessionError::EngineJoin(e)
            })?;

        info!(target: "consult.engine", channel = %channel, uid = %uid, "Joined engine channel");
        Ok(())
    }

    /// Publish local tracks.
    pub async fn publish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), SessionError> {
        if tracks.is_empty() {
            return Ok(());
        }
        self.client.publish(tracks).await.map_err(|e| {
            warn!(target: "consult.engine", error = %e, count = tracks.len(), "Publish failed");
            SessionError::Publish(e)
        })?;
        debug!(target: "consult.engine", count = tracks.len(), "Published local tracks");
        Ok(())
    }

    /// Unpublish local tracks.
    pub async fn unpublish(&self, tracks: &[Arc<dyn TrackHandle>]) -> Result<(), SessionError> {
        if tracks.is_empty() {
            return Ok(());
        }
        self.client.unpublish(tracks).await.map_err(|e| {
            warn!(target: "consult.engine", error = %e, count = tracks.len(), "Unpublish failed");
            SessionError::Publish(e)
        })?;
        debug!(target: "consult.engine", count = tracks.len(), "Unpublished local tracks");
        Ok(())
    }

    /// Subscribe to a remote track.
    pub async fn subscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<Arc<dyn TrackHandle>, SessionError> {
        self.client
            .subscribe(participant_id, kind)
            .await
            .map_err(|source| SessionError::Subscribe {
                participant_id: participant_id.clone(),
                kind,
                source,
            })
    }

    /// Drop a remote subscription.
    pub async fn unsubscribe(
        &self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Result<(), EngineError> {
        self.client.unsubscribe(participant_id, kind).await
    }

    /// Leave the engine channel.
    pub async fn leave(&self) -> Result<(), EngineError> {
        self.client.leave().await?;
        info!(target: "consult.engine", "Left engine channel");
        Ok(())
    }
}
