//! Remote Participant Registry.
//!
//! [`ParticipantMap`] is the pure projection of engine events onto the set of
//! remote participants. [`RegistryTask`] drives it: it consumes the engine
//! event channel, issues subscribes through the engine adapter, and publishes
//! immutable [`ParticipantsSnapshot`]s on a watch channel.
//!
//! A track handle is stored only once its subscribe resolves, and only if the
//! subscribe is still the latest one requested for that participant and kind.
//! Every `user-published` bumps a generation counter; a subscribe that
//! resolves after `user-unpublished`, `user-left`, or a newer publish is stale.

mod task;

pub use task::RegistryTask;

use crate::media::{TrackHandle, TrackKind};
use common::types::ParticipantId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A remote participant and the tracks subscribed for it.
#[derive(Debug, Clone)]
pub struct RemoteParticipant {
    /// Engine-assigned participant id.
    pub participant_id: ParticipantId,
    /// Subscribed audio track.
    pub audio: Option<Arc<dyn TrackHandle>>,
    /// Subscribed video track.
    pub video: Option<Arc<dyn TrackHandle>>,
}

impl RemoteParticipant {
    fn new(participant_id: ParticipantId) -> Self {
        Self {
            participant_id,
            audio: None,
            video: None,
        }
    }

    /// The subscribed track of `kind`, if any.
    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<dyn TrackHandle>> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    fn slot(&mut self, kind: TrackKind) -> &mut Option<Arc<dyn TrackHandle>> {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    /// Joined but not publishing anything yet.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Immutable view of the registry, ordered by participant id.
pub type ParticipantsSnapshot = Arc<BTreeMap<ParticipantId, RemoteParticipant>>;

/// A subscribe that has been requested and not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeTicket {
    /// Remote participant.
    pub participant_id: ParticipantId,
    /// Track kind.
    pub kind: TrackKind,
    generation: u64,
}

/// What to do with a resolved subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Stored in the registry.
    Stored,
    /// Superseded or withdrawn. `unsubscribe` is false when a newer subscribe
    /// for the same participant and kind is pending or stored, since the
    /// engine call would tear that one down too.
    Stale {
        /// Whether the engine subscription should be dropped.
        unsubscribe: bool,
    },
}

/// Pure projection of engine events.
#[derive(Debug, Default)]
pub struct ParticipantMap {
    participants: BTreeMap<ParticipantId, RemoteParticipant>,
    pending: HashMap<(ParticipantId, TrackKind), u64>,
    next_generation: u64,
}

impl ParticipantMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remote participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no remote participant is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Look up a participant.
    #[must_use]
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&RemoteParticipant> {
        self.participants.get(participant_id)
    }

    /// Whether a subscribe for this participant and kind is in flight.
    #[must_use]
    pub fn is_pending(&self, participant_id: &ParticipantId, kind: TrackKind) -> bool {
        self.pending.contains_key(&(participant_id.clone(), kind))
    }

    /// `user-joined`. Returns false if the participant was already present.
    pub fn on_joined(&mut self, participant_id: ParticipantId) -> bool {
        if self.participants.contains_key(&participant_id) {
            return false;
        }
        self.participants
            .insert(participant_id.clone(), RemoteParticipant::new(participant_id));
        true
    }

    /// `user-left`. Removes the participant and withdraws its pending subscribes.
    ///
    /// Returns the removed entry so the caller can drop its engine subscriptions.
    pub fn on_left(&mut self, participant_id: &ParticipantId) -> Option<RemoteParticipant> {
        self.pending.retain(|(pid, _), _| pid != participant_id);
        self.participants.remove(participant_id)
    }

    /// `user-published`. Creates the participant if unknown and returns the
    /// ticket for the subscribe the caller must issue.
    pub fn on_published(&mut self, participant_id: ParticipantId, kind: TrackKind) -> SubscribeTicket {
        self.participants
            .entry(participant_id.clone())
            .or_insert_with(|| RemoteParticipant::new(participant_id.clone()));

        self.next_generation += 1;
        let generation = self.next_generation;
        self.pending.insert((participant_id.clone(), kind), generation);

        SubscribeTicket {
            participant_id,
            kind,
            generation,
        }
    }

    /// `user-unpublished`. Clears the stored track and withdraws any pending subscribe.
    ///
    /// Returns the removed handle, if one was stored.
    pub fn on_unpublished(
        &mut self,
        participant_id: &ParticipantId,
        kind: TrackKind,
    ) -> Option<Arc<dyn TrackHandle>> {
        self.pending.remove(&(participant_id.clone(), kind));
        self.participants
            .get_mut(participant_id)
            .and_then(|p| p.slot(kind).take())
    }

    /// A subscribe resolved with `track`.
    pub fn complete_subscribe(
        &mut self,
        ticket: &SubscribeTicket,
        track: Arc<dyn TrackHandle>,
    ) -> SubscribeOutcome {
        let key = (ticket.participant_id.clone(), ticket.kind);
        match self.pending.get(&key) {
            Some(generation) if *generation == ticket.generation => {
                self.pending.remove(&key);
            }
            Some(_) => return SubscribeOutcome::Stale { unsubscribe: false },
            None => {
                let stored = self
                    .participants
                    .get(&ticket.participant_id)
                    .is_some_and(|p| p.track(ticket.kind).is_some());
                return SubscribeOutcome::Stale {
                    unsubscribe: !stored,
                };
            }
        }

        match self.participants.get_mut(&ticket.participant_id) {
            Some(participant) => {
                *participant.slot(ticket.kind) = Some(track);
                SubscribeOutcome::Stored
            }
            None => SubscribeOutcome::Stale { unsubscribe: true },
        }
    }

    /// A subscribe failed; the track stays absent.
    pub fn fail_subscribe(&mut self, ticket: &SubscribeTicket) {
        let key = (ticket.participant_id.clone(), ticket.kind);
        if self.pending.get(&key) == Some(&ticket.generation) {
            self.pending.remove(&key);
        }
    }

    /// Remove everything. Returns the (participant, kind) pairs that had a
    /// stored track, for engine unsubscribe.
    pub fn drain(&mut self) -> Vec<(ParticipantId, TrackKind)> {
        self.pending.clear();
        let participants = std::mem::take(&mut self.participants);
        participants
            .into_values()
            .flat_map(|p| {
                let mut held = Vec::new();
                if p.audio.is_some() {
                    held.push((p.participant_id.clone(), TrackKind::Audio));
                }
                if p.video.is_some() {
                    held.push((p.participant_id, TrackKind::Video));
                }
                held
            })
            .collect()
    }

    /// Immutable snapshot for readers.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantsSnapshot {
        Arc::new(self.participants.clone())
    }
}
