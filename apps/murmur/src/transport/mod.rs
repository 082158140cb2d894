pub mod replay;

use crossbeam_channel::Sender;
use std::sync::Arc;

use crate::event::Event;
use crate::room::{RoomContext, RoomId};

/// Callback invoked by the transport, possibly from its own thread, for every
/// event delivered to a room.
pub type Listener = Arc<dyn Fn(RoomId, Event) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct Inbound {
    pub room_id: RoomId,
    pub event: Event,
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),
    #[error("not joined to room {0}")]
    NotJoined(RoomId),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("invalid fixture: {0}")]
    Fixture(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Homeserver connection as seen by the client core.
pub trait Transport: Send + Sync {
    fn user_id(&self) -> String;

    fn join_room(&self, room: &RoomId) -> Result<Arc<dyn RoomContext>, TransportError>;

    fn leave_room(&self, room: &RoomId) -> Result<(), TransportError>;

    /// Sends a plain text message; returns the new event id.
    fn send_text(&self, room: &RoomId, text: &str) -> Result<String, TransportError>;

    fn send_emote(&self, room: &RoomId, text: &str) -> Result<String, TransportError>;

    /// Fetches up to `limit` events older than anything delivered so far.
    ///
    /// The events reach the room's listeners before this returns. The result
    /// is the number of events fetched; 0 means the history is exhausted.
    fn backfill(&self, room: &RoomId, limit: usize) -> Result<usize, TransportError>;

    fn add_listener(&self, room: &RoomId, listener: Listener) -> Result<(), TransportError>;
}

/// Listener that forwards every delivery into `tx`. Once the receiving side
/// is gone deliveries are dropped.
pub fn channel_listener(tx: Sender<Inbound>) -> Listener {
    Arc::new(move |room_id, event| {
        if tx.send(Inbound { room_id, event }).is_err() {
            tracing::trace!(target = "client::transport", "inbox closed; dropping event");
        }
    })
}
