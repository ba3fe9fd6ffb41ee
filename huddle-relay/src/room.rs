//! Participant registry for the shared room.
//!
//! [`Room`] owns every participant record behind a single lock. Each
//! operation takes the lock once, mutates membership, and queues all the
//! frames it produces before releasing it, so one participant's
//! `your-id` / `new-peer` / `existing-peers` sequence never interleaves with
//! another participant's join or departure.
//!
//! Frames are queued with a non-blocking `try_send` into each connection's
//! bounded outbound queue. A participant whose queue is full or closed is
//! evicted on the spot, which is announced to the room like any other
//! departure.

use std::collections::HashMap;

use huddle_proto::peer::{PeerId, PeerInfo};
use huddle_proto::signal::{
    self, Inbound, Negotiation, NegotiationKind, Payload, ProtoError, SignalMessage,
};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Display name bound when a `join` carries none.
pub const DEFAULT_NAME: &str = "Guest";

/// Sending half of a connection's bounded outbound queue.
///
/// Items are encoded JSON text frames. The room holds the only sender, so
/// removing a participant closes its queue.
pub type Outbox = mpsc::Sender<String>;

/// A connected participant.
struct Participant {
    outbox: Outbox,
    /// Set once the participant has sent `join`.
    joined: Option<Joined>,
}

struct Joined {
    name: String,
    seq: u64,
}

/// Lock-protected membership state.
#[derive(Default)]
struct Members {
    participants: HashMap<PeerId, Participant>,
    /// Next join sequence number.
    next_seq: u64,
}

impl Members {
    /// Joined participants other than `except`, in join order.
    fn joined_peers(&self, except: Option<&PeerId>) -> Vec<PeerInfo> {
        let mut peers: Vec<(u64, PeerInfo)> = self
            .participants
            .iter()
            .filter(|(id, _)| Some(*id) != except)
            .filter_map(|(id, p)| {
                p.joined.as_ref().map(|j| {
                    (
                        j.seq,
                        PeerInfo {
                            id: id.clone(),
                            name: j.name.clone(),
                        },
                    )
                })
            })
            .collect();
        peers.sort_by_key(|(seq, _)| *seq);
        peers.into_iter().map(|(_, info)| info).collect()
    }

    fn send(&self, to: &PeerId, text: String, failed: &mut Vec<PeerId>) {
        if let Some(participant) = self.participants.get(to) {
            deliver(to, participant, text, failed);
        }
    }

    /// Queues `text` for every joined participant except `except`.
    fn broadcast(&self, except: &PeerId, text: &str, failed: &mut Vec<PeerId>) {
        for (id, participant) in &self.participants {
            if id != except && participant.joined.is_some() {
                deliver(id, participant, text.to_string(), failed);
            }
        }
    }

    /// Removes a participant, announcing the departure if it had joined.
    ///
    /// Returns `false` if the participant was already gone.
    fn leave(&mut self, id: &PeerId, failed: &mut Vec<PeerId>) -> bool {
        let Some(participant) = self.participants.remove(id) else {
            return false;
        };
        if participant.joined.is_some() {
            match signal::encode(&SignalMessage::PeerLeft { id: id.clone() }) {
                Ok(text) => self.broadcast(id, &text, failed),
                Err(e) => tracing::error!(peer_id = %id, error = %e, "failed to encode peer-left"),
            }
        }
        true
    }

    /// Removes every participant whose delivery failed, including any that
    /// fail while their predecessors' departures are announced.
    fn evict(&mut self, mut failed: Vec<PeerId>) {
        while let Some(id) = failed.pop() {
            if self.leave(&id, &mut failed) {
                tracing::warn!(peer_id = %id, "participant evicted after failed delivery");
            }
        }
    }
}

fn deliver(id: &PeerId, participant: &Participant, text: String, failed: &mut Vec<PeerId>) {
    match participant.outbox.try_send(text) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(peer_id = %id, "outbound queue full");
            failed.push(id.clone());
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(peer_id = %id, "outbound queue closed");
            failed.push(id.clone());
        }
    }
}

/// Encodes the `your-id`, `new-peer` and `existing-peers` frames of a join.
fn encode_join_frames(
    id: &PeerId,
    name: &str,
    peers: Vec<PeerInfo>,
) -> Result<(String, String, String), ProtoError> {
    Ok((
        signal::encode(&SignalMessage::YourId { id: id.clone() })?,
        signal::encode(&SignalMessage::NewPeer {
            id: id.clone(),
            name: name.to_string(),
        })?,
        signal::encode(&SignalMessage::ExistingPeers { peers })?,
    ))
}

/// The shared room: registry of connected participants.
pub struct Room {
    members: Mutex<Members>,
    default_name: String,
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

impl Room {
    /// Creates an empty room using [`DEFAULT_NAME`] as the placeholder name.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_name(DEFAULT_NAME)
    }

    /// Creates an empty room with a custom placeholder name.
    #[must_use]
    pub fn with_default_name(default_name: impl Into<String>) -> Self {
        Self {
            members: Mutex::new(Members::default()),
            default_name: default_name.into(),
        }
    }

    /// Registers a new connection and returns its freshly generated identity.
    ///
    /// Nothing is sent until the participant joins.
    pub fn connect(&self, outbox: Outbox) -> PeerId {
        let id = PeerId::generate();
        self.members.lock().participants.insert(
            id.clone(),
            Participant {
                outbox,
                joined: None,
            },
        );
        id
    }

    /// Processes one inbound text frame from `sender`.
    ///
    /// Malformed frames and unknown or server-only message types are logged
    /// and dropped; they never affect the connection.
    pub fn handle_text(&self, sender: &PeerId, raw: &str) {
        match signal::decode(raw) {
            Ok(Inbound::Signal(SignalMessage::Join { name })) => self.join(sender, name),
            Ok(Inbound::Negotiation(negotiation)) => self.forward(sender, negotiation),
            Ok(Inbound::Signal(other)) => {
                tracing::warn!(peer_id = %sender, msg = ?other, "unexpected message type from client");
            }
            Err(e) => {
                tracing::warn!(peer_id = %sender, error = %e, "dropping malformed message");
            }
        }
    }

    /// Binds the sender's name and runs the join announcement sequence.
    fn join(&self, sender: &PeerId, name: Option<String>) {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.default_name.clone());

        let mut members = self.members.lock();
        match members.participants.get(sender) {
            None => {
                tracing::debug!(peer_id = %sender, "join from a participant that already left");
                return;
            }
            Some(p) if p.joined.is_some() => {
                tracing::warn!(peer_id = %sender, "ignoring duplicate join");
                return;
            }
            Some(_) => {}
        }

        // The snapshot is frozen before anyone hears about the sender.
        let peers = members.joined_peers(Some(sender));
        let existing = peers.len();
        let (your_id, new_peer, existing_peers) = match encode_join_frames(sender, &name, peers) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(peer_id = %sender, error = %e, "failed to encode join frames");
                return;
            }
        };

        let seq = members.next_seq;
        members.next_seq += 1;
        if let Some(participant) = members.participants.get_mut(sender) {
            participant.joined = Some(Joined {
                name: name.clone(),
                seq,
            });
        }

        let mut failed = Vec::new();
        members.send(sender, your_id, &mut failed);
        members.broadcast(sender, &new_peer, &mut failed);
        members.send(sender, existing_peers, &mut failed);
        members.evict(failed);
        drop(members);

        tracing::info!(peer_id = %sender, name = %name, existing, "participant joined");
    }

    /// Routes an `offer`, `answer` or `ice` message to its target.
    ///
    /// Both ends must have joined. `from` is always the sender's identity;
    /// `offer` and `answer` get the sender's bound name when they carry none
    /// or a null one. Every other field is passed through as sent.
    fn forward(&self, sender: &PeerId, mut negotiation: Negotiation) {
        let mut members = self.members.lock();

        let Some(sender_name) = members
            .participants
            .get(sender)
            .and_then(|p| p.joined.as_ref())
            .map(|j| j.name.clone())
        else {
            tracing::warn!(
                peer_id = %sender,
                kind = %negotiation.kind,
                "dropping negotiation from participant that has not joined"
            );
            return;
        };

        let target_present = members
            .participants
            .get(&negotiation.to)
            .is_some_and(|p| p.joined.is_some());
        if !target_present {
            tracing::debug!(
                from = %sender,
                to = %negotiation.to,
                kind = %negotiation.kind,
                "target not in room, dropping"
            );
            return;
        }

        negotiation.from = Some(sender.clone());
        if negotiation.kind != NegotiationKind::Ice
            && negotiation.name().is_none_or(Payload::is_null)
        {
            match Payload::from_value(&sender_name) {
                Ok(name) => {
                    negotiation.set_field("name", name);
                }
                Err(e) => {
                    tracing::error!(peer_id = %sender, error = %e, "failed to encode name");
                    return;
                }
            }
        }

        let text = match signal::encode_negotiation(&negotiation) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(peer_id = %sender, error = %e, "failed to encode negotiation");
                return;
            }
        };

        tracing::debug!(
            from = %sender,
            to = %negotiation.to,
            kind = %negotiation.kind,
            len = text.len(),
            "routing negotiation"
        );

        let mut failed = Vec::new();
        members.send(&negotiation.to, text, &mut failed);
        members.evict(failed);
    }

    /// Removes a participant and announces its departure.
    ///
    /// Returns `false` if the participant was already removed, e.g. evicted
    /// after a failed delivery.
    pub fn disconnect(&self, id: &PeerId) -> bool {
        let mut members = self.members.lock();
        let mut failed = Vec::new();
        let removed = members.leave(id, &mut failed);
        members.evict(failed);
        removed
    }

    /// Drops every participant without announcements, closing all outbound
    /// queues. Returns how many participants were connected.
    pub fn close_all(&self) -> usize {
        let mut members = self.members.lock();
        let count = members.participants.len();
        for (id, _) in members.participants.drain() {
            tracing::info!(peer_id = %id, "closing connection");
        }
        count
    }

    /// Number of connected participants, joined or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().participants.len()
    }

    /// Returns `true` if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().participants.is_empty()
    }

    /// Joined participants in join order.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.members.lock().joined_peers(None)
    }
}
