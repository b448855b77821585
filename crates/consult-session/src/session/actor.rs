//! `SessionActor` - owns one consultation session's resources and state.

use super::messages::{SessionFailure, SessionMessage, SessionSnapshot};
use super::{SessionDeps, SessionIdentity};
use crate::chat::{ChatSnapshot, ChatSyncHandle, ChatSynchronizer};
use crate::config::SessionConfig;
use crate::engine::EngineAdapter;
use crate::errors::{FailureReason, SessionError};
use crate::media::{LocalMedia, LocalTrack, MediaConfig, TrackKind};
use crate::observability::metrics;
use crate::registry::{ParticipantsSnapshot, RegistryTask};
use crate::state::{SessionState, SourceMode};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// A background task owned by the session.
struct ManagedTask {
    join: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Outcome of a failed source swap.
enum SwapError {
    /// The new source could not be acquired; the previous source was
    /// restored and the session keeps running.
    Recovered(SessionError),
    /// The engine rejected the swap or the restore failed.
    Fatal(SessionError),
}

/// The session actor.
pub(super) struct SessionActor {
    identity: SessionIdentity,
    deps: SessionDeps,
    config: SessionConfig,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancelled the instant teardown begins (or `leave()` is called).
    root_token: CancellationToken,
    state: SessionState,
    failure: Option<SessionFailure>,
    media: LocalMedia,
    engine: Option<EngineAdapter>,
    joined: bool,
    registry: Option<ManagedTask>,
    chat: Option<(ChatSyncHandle, ManagedTask)>,
    torn_down: bool,
    state_tx: watch::Sender<SessionSnapshot>,
    participants_tx: Arc<watch::Sender<ParticipantsSnapshot>>,
    chat_tx: Arc<watch::Sender<ChatSnapshot>>,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        identity: SessionIdentity,
        deps: SessionDeps,
        config: SessionConfig,
        receiver: mpsc::Receiver<SessionMessage>,
        root_token: CancellationToken,
        state_tx: watch::Sender<SessionSnapshot>,
        participants_tx: Arc<watch::Sender<ParticipantsSnapshot>>,
        chat_tx: Arc<watch::Sender<ChatSnapshot>>,
    ) -> Self {
        let media = LocalMedia::new(Arc::clone(&deps.capture));
        Self {
            identity,
            deps,
            config,
            receiver,
            root_token,
            state: SessionState::Idle,
            failure: None,
            media,
            engine: None,
            joined: false,
            registry: None,
            chat: None,
            torn_down: false,
            state_tx,
            participants_tx,
            chat_tx,
        }
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "consult.session",
        fields(
            consultation_id = %self.identity.consultation_id,
            participant_id = %self.identity.local_participant_id
        )
    )]
    pub(super) async fn run(mut self) {
        debug!(target: "consult.session", "Session actor started");

        while let Some(message) = self.receiver.recv().await {
            self.handle_message(message).await;
        }

        // Every handle was dropped without leave().
        if self.state.is_active() {
            info!(
                target: "consult.session",
                state = %self.state,
                "All session handles dropped, tearing down"
            );
            self.teardown(SessionState::Ended).await;
        }

        debug!(target: "consult.session", state = %self.state, "Session actor stopped");
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Start { media, respond_to } => {
                let result = self.start(&media).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleMute { kind, respond_to } => {
                let result = self.toggle_mute(kind).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ToggleScreenShare {
                in_flight,
                respond_to,
            } => {
                let result = self.toggle_screen_share().await;
                let _ = respond_to.send(result);
                drop(in_flight);
            }

            SessionMessage::SendChat { body, respond_to } => {
                match self.connected_chat("send_chat_message") {
                    Ok(chat) => chat.send(body, respond_to).await,
                    Err(e) => {
                        let _ = respond_to.send(Err(e));
                    }
                }
            }

            SessionMessage::RetryChat {
                correlation_id,
                respond_to,
            } => match self.connected_chat("retry_chat_message") {
                Ok(chat) => chat.retry(correlation_id, respond_to).await,
                Err(e) => {
                    let _ = respond_to.send(Err(e));
                }
            },

            SessionMessage::Leave { respond_to } => {
                let result = self.leave().await;
                let _ = respond_to.send(result);
            }
        }
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    async fn start(&mut self, media: &MediaConfig) -> Result<(), SessionError> {
        self.state.require("start", &[SessionState::Idle])?;
        self.transition(SessionState::Connecting);
        metrics::record_session_started();
        let started = Instant::now();

        match self.connect(media).await {
            Ok(()) => {
                self.transition(SessionState::Connected);
                metrics::record_session_start_duration("success", started.elapsed());
                info!(
                    target: "consult.session",
                    channel = %self.identity.channel_name,
                    "Session connected"
                );
                Ok(())
            }
            Err(SessionError::Cancelled) => {
                info!(target: "consult.session", "Start interrupted by leave");
                metrics::record_session_start_duration("cancelled", started.elapsed());
                self.teardown(SessionState::Ended).await;
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                warn!(target: "consult.session", error = %e, "Session start failed");
                metrics::record_session_start_duration("error", started.elapsed());
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Steps 1-5 of the start sequence. Every `?` leaves cleanup to teardown,
    /// which releases exactly what was acquired so far.
    async fn connect(&mut self, media: &MediaConfig) -> Result<(), SessionError> {
        self.media.acquire_camera_and_mic(media).await?;
        self.check_cancelled()?;

        let engine = EngineAdapter::new(self.deps.engine.as_ref());
        let events = engine.attach_events();
        self.engine = Some(engine.clone());
        engine
            .join(
                &self.identity.engine_app_id,
                &self.identity.channel_name,
                &self.identity.auth_token,
                &self.identity.local_participant_id,
            )
            .await?;
        self.joined = true;
        self.check_cancelled()?;

        engine.publish(&self.media.tracks().handles()).await?;
        self.media.tracks_mut().mark_all_published(true);
        self.check_cancelled()?;

        // Not a child of the root token: remote subscriptions are dropped only
        // after local tracks are released.
        let registry_token = CancellationToken::new();
        let join = RegistryTask::spawn(
            self.identity.consultation_id.clone(),
            engine,
            events,
            Arc::clone(&self.participants_tx),
            registry_token.clone(),
        );
        self.registry = Some(ManagedTask {
            join,
            cancel_token: registry_token,
        });

        let chat_token = self.root_token.child_token();
        let (chat, join) = ChatSynchronizer::spawn(
            self.identity.consultation_id.clone(),
            self.identity.local_participant_id.clone(),
            self.identity.local_display_name.clone(),
            Arc::clone(&self.deps.messages),
            Arc::clone(&self.chat_tx),
            self.config.chat_poll_interval,
            chat_token.clone(),
        );
        self.chat = Some((
            chat,
            ManagedTask {
                join,
                cancel_token: chat_token,
            },
        ));

        self.check_cancelled()
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.root_token.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------
    // Connected operations
    // ------------------------------------------------------------------

    async fn toggle_mute(&mut self, kind: TrackKind) -> Result<bool, SessionError> {
        let operation = match kind {
            TrackKind::Audio => "toggle_audio_mute",
            TrackKind::Video => "toggle_video_mute",
        };
        self.state.require(operation, &[SessionState::Connected])?;

        let muted = self.media.toggle_muted(kind).await?;
        self.publish_snapshot();
        Ok(muted)
    }

    fn connected_chat(&self, operation: &'static str) -> Result<ChatSyncHandle, SessionError> {
        self.state.require(operation, &[SessionState::Connected])?;
        self.chat
            .as_ref()
            .map(|(handle, _)| handle.clone())
            .ok_or_else(|| SessionError::Internal("chat synchronizer not running".to_string()))
    }

    async fn toggle_screen_share(&mut self) -> Result<SourceMode, SessionError> {
        self.state
            .require("toggle_screen_share", &[SessionState::Connected])?;

        let target = self.media.tracks().source_mode().toggled();
        match self.swap_video(target).await {
            Ok(()) => {
                metrics::record_screen_share_toggle("success");
                info!(target: "consult.session", source_mode = target.as_str(), "Video source swapped");
                self.publish_snapshot();
                Ok(target)
            }
            Err(SwapError::Recovered(e)) => {
                metrics::record_screen_share_toggle("recovered");
                warn!(
                    target: "consult.session",
                    error = %e,
                    "Screen capture unavailable, kept camera"
                );
                self.publish_snapshot();
                Err(e)
            }
            Err(SwapError::Fatal(e)) => {
                metrics::record_screen_share_toggle("error");
                error!(target: "consult.session", error = %e, "Video source swap failed");
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    /// Replace the published video-class track with one from `target`.
    ///
    /// The old track is unpublished and released before the new one is
    /// acquired, so at most one video-class track is ever open.
    async fn swap_video(&mut self, target: SourceMode) -> Result<(), SwapError> {
        let engine = self
            .engine
            .clone()
            .ok_or_else(|| SwapError::Fatal(SessionError::Internal("engine not joined".to_string())))?;

        if let Some(old) = self.media.tracks().video() {
            if old.is_published() {
                engine
                    .unpublish(&[old.handle()])
                    .await
                    .map_err(SwapError::Fatal)?;
            }
        }
        if let Some(mut old) = self.media.take_video() {
            old.set_published(false);
            self.media.release(old);
        }

        let track = match self.media.acquire_source(target).await {
            Ok(track) => track,
            Err(e) if target == SourceMode::Screen => {
                let camera = self.media.acquire_camera().await.map_err(SwapError::Fatal)?;
                self.install_and_publish(&engine, camera, SourceMode::Camera)
                    .await
                    .map_err(SwapError::Fatal)?;
                return Err(SwapError::Recovered(e));
            }
            Err(e) => return Err(SwapError::Fatal(e)),
        };

        self.install_and_publish(&engine, track, target)
            .await
            .map_err(SwapError::Fatal)
    }

    async fn install_and_publish(
        &mut self,
        engine: &EngineAdapter,
        track: LocalTrack,
        mode: SourceMode,
    ) -> Result<(), SessionError> {
        let handle = track.handle();
        self.media.install_video(track, mode).await?;
        engine.publish(&[handle]).await?;
        if let Some(video) = self.media.tracks_mut().video_mut() {
            video.set_published(true);
        }
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Idle => Err(SessionError::InvalidState {
                operation: "leave",
                state: self.state,
            }),
            SessionState::Ended | SessionState::Failed => Ok(()),
            SessionState::Connecting | SessionState::Connected => {
                info!(target: "consult.session", state = %self.state, "Leaving session");
                self.teardown(SessionState::Ended).await;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Failure and teardown
    // ------------------------------------------------------------------

    async fn fail(&mut self, error: &SessionError) {
        if self.torn_down {
            return;
        }
        self.failure = Some(SessionFailure {
            reason: error.failure_reason().unwrap_or(FailureReason::Connection),
            message: error.client_message(),
            state_at_failure: self.state,
        });
        self.teardown(SessionState::Failed).await;
    }

    /// The single teardown routine. Runs at most once.
    async fn teardown(&mut self, outcome: SessionState) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.root_token.cancel();

        debug!(target: "consult.session", from = %self.state, to = %outcome, "Teardown started");

        // 1. Chat synchronizer (child of the root token, already cancelled)
        if let Some((chat, task)) = self.chat.take() {
            drop(chat);
            self.await_task("chat_stop", task).await;
        }

        // 2. Local tracks
        if let Some(engine) = self.engine.as_ref() {
            let published = self.media.tracks().published_handles();
            if !published.is_empty() {
                if let Err(e) = engine.unpublish(&published).await {
                    Self::step_failed("local_unpublish", e.to_string());
                }
            }
        }
        self.media.tracks_mut().mark_all_published(false);
        let released = self.media.release_all();

        // 3. Remote participants
        if let Some(task) = self.registry.take() {
            self.await_task("registry_stop", task).await;
        }

        // 4. Engine
        if let Some(engine) = self.engine.take() {
            engine.detach_events();
            if self.joined {
                if let Err(e) = engine.leave().await {
                    Self::step_failed("engine_leave", e.to_string());
                }
                self.joined = false;
            }
        }

        // 5. Terminal state
        self.transition(outcome);
        metrics::record_session_outcome(outcome.as_str());
        info!(
            target: "consult.session",
            outcome = %outcome,
            released_tracks = released,
            "Session torn down"
        );
    }

    async fn await_task(&self, step: &'static str, mut task: ManagedTask) {
        task.cancel_token.cancel();
        match tokio::time::timeout(self.config.teardown_task_timeout, &mut task.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => Self::step_failed(step, e.to_string()),
            Err(_) => {
                task.join.abort();
                Self::step_failed(step, "timed out".to_string());
            }
        }
    }

    fn step_failed(step: &'static str, reason: String) {
        let error = SessionError::Teardown { step, reason };
        warn!(target: "consult.session", step, error = %error, "Teardown step failed, continuing");
        metrics::record_teardown_step_failure(step);
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            error!(
                target: "consult.session",
                from = %self.state,
                to = %next,
                "Rejected invalid state transition"
            );
            return;
        }
        debug!(target: "consult.session", from = %self.state, to = %next, "State transition");
        self.state = next;
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        let tracks = self.media.tracks();
        self.state_tx.send_replace(SessionSnapshot {
            state: self.state,
            audio_muted: tracks.audio_muted(),
            video_muted: tracks.video_muted(),
            source_mode: tracks.source_mode(),
            failure: self.failure.clone(),
        });
    }
}
