use std::collections::{HashMap, HashSet};

use crate::room::RoomId;

/// Identifiers of every event processed per open room.
#[derive(Debug, Default)]
pub struct DedupQueue {
    seen: HashMap<RoomId, HashSet<String>>,
}

impl DedupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event_id` for `room` and reports whether it had been
    /// recorded before.
    pub fn check_and_mark(&mut self, room: &RoomId, event_id: &str) -> bool {
        let ids = self.seen.entry(room.clone()).or_default();
        if ids.contains(event_id) {
            return true;
        }
        ids.insert(event_id.to_string());
        false
    }

    /// Forgets the room's ids along with its history, so a later rejoin
    /// accepts them again.
    pub fn forget_room(&mut self, room: &RoomId) {
        self.seen.remove(room);
    }
}
