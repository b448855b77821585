//! Registry task: drives [`ParticipantMap`] from engine events.

use super::{ParticipantMap, ParticipantsSnapshot, SubscribeOutcome, SubscribeTicket};
use crate::engine::{EngineAdapter, EngineEvent, EngineEvents};
use crate::errors::SessionError;
use crate::media::{TrackHandle, TrackKind};
use crate::observability::metrics;

use common::types::{ConsultationId, ParticipantId};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type SubscribeResult = (SubscribeTicket, Result<Arc<dyn TrackHandle>, SessionError>);

/// Event-driven owner of the remote participant map.
///
/// Runs until its token is cancelled, then drops every engine subscription it
/// holds and publishes an empty snapshot before exiting.
pub struct RegistryTask {
    consultation_id: ConsultationId,
    engine: EngineAdapter,
    events: EngineEvents,
    map: ParticipantMap,
    subscribes: JoinSet<SubscribeResult>,
    snapshot_tx: Arc<watch::Sender<ParticipantsSnapshot>>,
    cancel_token: CancellationToken,
}

impl RegistryTask {
    /// Spawn the task.
    #[must_use]
    pub fn spawn(
        consultation_id: ConsultationId,
        engine: EngineAdapter,
        events: EngineEvents,
        snapshot_tx: Arc<watch::Sender<ParticipantsSnapshot>>,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let task = Self {
            consultation_id,
            engine,
            events,
            map: ParticipantMap::new(),
            subscribes: JoinSet::new(),
            snapshot_tx,
            cancel_token,
        };
        tokio::spawn(task.run())
    }

    #[instrument(skip_all, name = "consult.registry", fields(consultation_id = %self.consultation_id))]
    async fn run(mut self) {
        debug!(target: "consult.registry", "Registry task started");
        let mut events_open = true;

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => break,

                Some(joined) = self.subscribes.join_next(), if !self.subscribes.is_empty() => {
                    self.on_subscribe_resolved(joined).await;
                }

                event = self.events.recv(), if events_open => {
                    match event {
                        Some(event) => self.on_event(event).await,
                        None => {
                            debug!(target: "consult.registry", "Engine event channel closed");
                            events_open = false;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::UserJoined(participant_id) => {
                if self.map.on_joined(participant_id.clone()) {
                    info!(target: "consult.registry", participant_id = %participant_id, "Remote participant joined");
                    self.publish_snapshot();
                }
            }
            EngineEvent::UserLeft(participant_id) => {
                if let Some(removed) = self.map.on_left(&participant_id) {
                    info!(target: "consult.registry", participant_id = %participant_id, "Remote participant left");
                    for kind in [TrackKind::Audio, TrackKind::Video] {
                        if removed.track(kind).is_some() {
                            self.unsubscribe(&participant_id, kind).await;
                        }
                    }
                    self.publish_snapshot();
                }
            }
            EngineEvent::UserPublished {
                participant_id,
                kind,
            } => {
                let created = self.map.get(&participant_id).is_none();
                let ticket = self.map.on_published(participant_id, kind);
                debug!(
                    target: "consult.registry",
                    participant_id = %ticket.participant_id,
                    kind = %kind,
                    "Remote track published, subscribing"
                );
                let engine = self.engine.clone();
                self.subscribes.spawn(async move {
                    let result = engine.subscribe(&ticket.participant_id, ticket.kind).await;
                    (ticket, result)
                });
                if created {
                    self.publish_snapshot();
                }
            }
            EngineEvent::UserUnpublished {
                participant_id,
                kind,
            } => {
                if self.map.on_unpublished(&participant_id, kind).is_some() {
                    self.unsubscribe(&participant_id, kind).await;
                    self.publish_snapshot();
                }
            }
        }
    }

    async fn on_subscribe_resolved(&mut self, joined: Result<SubscribeResult, JoinError>) {
        let (ticket, result) = match joined {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(target: "consult.registry", error = %e, "Subscribe task failed");
                return;
            }
        };

        let track = match result {
            Ok(track) => track,
            Err(e) => {
                warn!(
                    target: "consult.registry",
                    participant_id = %ticket.participant_id,
                    kind = %ticket.kind,
                    error = %e,
                    "Remote subscribe failed, track stays absent"
                );
                metrics::record_subscribe_failure(ticket.kind.as_str());
                self.map.fail_subscribe(&ticket);
                return;
            }
        };

        // Teardown may have begun while the subscribe was in flight.
        if self.cancel_token.is_cancelled() {
            self.map.fail_subscribe(&ticket);
            self.unsubscribe(&ticket.participant_id, ticket.kind).await;
            return;
        }

        match self.map.complete_subscribe(&ticket, track) {
            SubscribeOutcome::Stored => {
                debug!(
                    target: "consult.registry",
                    participant_id = %ticket.participant_id,
                    kind = %ticket.kind,
                    "Remote track subscribed"
                );
                self.publish_snapshot();
            }
            SubscribeOutcome::Stale { unsubscribe } => {
                debug!(
                    target: "consult.registry",
                    participant_id = %ticket.participant_id,
                    kind = %ticket.kind,
                    "Discarding stale subscribe result"
                );
                if unsubscribe {
                    self.unsubscribe(&ticket.participant_id, ticket.kind).await;
                }
            }
        }
    }

    async fn unsubscribe(&self, participant_id: &ParticipantId, kind: TrackKind) {
        if let Err(e) = self.engine.unsubscribe(participant_id, kind).await {
            warn!(
                target: "consult.registry",
                participant_id = %participant_id,
                kind = %kind,
                error = %e,
                "Engine unsubscribe failed"
            );
        }
    }

    fn publish_snapshot(&self) {
        metrics::set_remote_participants(self.map.len());
        self.snapshot_tx.send_replace(self.map.snapshot());
    }

    /// Drop in-flight subscribes and every held subscription, then clear.
    async fn shutdown(&mut self) {
        self.subscribes.abort_all();
        while let Some(joined) = self.subscribes.join_next().await {
            // A subscribe can resolve between abort and join.
            if let Ok((ticket, Ok(_track))) = joined {
                self.unsubscribe(&ticket.participant_id, ticket.kind).await;
            }
        }

        let held = self.map.drain();
        let mut failures = 0usize;
        for (participant_id, kind) in &held {
            if let Err(e) = self.engine.unsubscribe(participant_id, *kind).await {
                failures += 1;
                warn!(
                    target: "consult.registry",
                    participant_id = %participant_id,
                    kind = %kind,
                    error = %e,
                    "Unsubscribe failed during teardown"
                );
            }
        }
        if failures > 0 {
            metrics::record_teardown_step_failure("remote_unsubscribe");
        }

        self.publish_snapshot();
        info!(
            target: "consult.registry",
            unsubscribed = held.len(),
            failures,
            "Registry task stopped"
        );
    }
}
