pub mod dedup;

pub use dedup::DedupQueue;

use ratatui::text::Line;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::event::Event;
use crate::render::{ClassificationError, Variant};
use crate::room::RoomId;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("event record has no event_id")]
    MissingEventId,
    #[error("room {0} is not open")]
    UnknownRoom(RoomId),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

/// One event materialized under its selected variant at a given width.
#[derive(Clone, Debug)]
pub struct RenderedEntity {
    pub event: Event,
    pub variant: Variant,
    pub lines: Vec<Line<'static>>,
    pub width: u16,
}

impl RenderedEntity {
    pub fn new(event: Event, variant: Variant, lines: Vec<Line<'static>>, width: u16) -> Self {
        Self {
            event,
            variant,
            lines,
            width,
        }
    }

    pub fn height(&self) -> usize {
        self.lines.len()
    }

    pub fn timestamp(&self) -> i64 {
        self.event.sort_key()
    }
}

/// Per-room rendered history, newest first.
#[derive(Debug, Default)]
pub struct RoomMessageStore {
    rooms: HashMap<RoomId, Vec<RenderedEntity>>,
}

impl RoomMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty history for `room` if it has none yet.
    pub fn open(&mut self, room: &RoomId) {
        self.rooms.entry(room.clone()).or_default();
    }

    /// Puts `entity` at the front (newest end) of the room's history.
    pub fn insert(&mut self, room: &RoomId, entity: RenderedEntity) -> Result<(), CoreError> {
        let entities = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| CoreError::UnknownRoom(room.clone()))?;
        entities.insert(0, entity);
        Ok(())
    }

    /// Stable sort, newest first. Entities with equal timestamps keep their
    /// relative order.
    pub fn sort_by_timestamp(&mut self, room: &RoomId) -> Result<(), CoreError> {
        let entities = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| CoreError::UnknownRoom(room.clone()))?;
        entities.sort_by_key(|entity| Reverse(entity.timestamp()));
        Ok(())
    }

    /// Live view of `count` entities starting `start` entries from the newest
    /// (all remaining when `count` is `None`). Out-of-range requests are clamped.
    pub fn range(&self, room: &RoomId, start: usize, count: Option<usize>) -> &[RenderedEntity] {
        match self.rooms.get(room) {
            Some(entities) => {
                let (from, to) = bounds(entities.len(), start, count);
                &entities[from..to]
            }
            None => &[],
        }
    }

    pub fn range_mut(
        &mut self,
        room: &RoomId,
        start: usize,
        count: Option<usize>,
    ) -> &mut [RenderedEntity] {
        match self.rooms.get_mut(room) {
            Some(entities) => {
                let (from, to) = bounds(entities.len(), start, count);
                &mut entities[from..to]
            }
            None => &mut [],
        }
    }

    pub fn len(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, room: &RoomId) -> bool {
        self.len(room) == 0
    }

    pub fn total_height(&self, room: &RoomId) -> usize {
        self.range(room, 0, None)
            .iter()
            .map(RenderedEntity::height)
            .sum()
    }

    /// Discards the room's history; returns whether there was one.
    pub fn drop_room(&mut self, room: &RoomId) -> bool {
        self.rooms.remove(room).is_some()
    }
}

fn bounds(len: usize, start: usize, count: Option<usize>) -> (usize, usize) {
    let from = start.min(len);
    let to = match count {
        Some(count) => from.saturating_add(count).min(len),
        None => len,
    };
    (from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(id: &str, ts: i64, height: usize) -> RenderedEntity {
        let event = Event::from_value(json!({ "event_id": id, "origin_server_ts": ts })).unwrap();
        let lines = (0..height).map(|_| Line::from(id.to_string())).collect();
        RenderedEntity::new(event, Variant::Unknown, lines, 10)
    }

    fn ids(entities: &[RenderedEntity]) -> Vec<&str> {
        entities
            .iter()
            .map(|entity| entity.event.event_id().unwrap())
            .collect()
    }

    #[test_timeout::timeout]
    fn insert_requires_an_open_room() {
        let mut store = RoomMessageStore::new();
        let room = RoomId::from("!r");
        assert_eq!(
            store.insert(&room, entity("a", 1, 1)),
            Err(CoreError::UnknownRoom(room.clone()))
        );
        store.open(&room);
        store.insert(&room, entity("a", 1, 1)).unwrap();
        store.insert(&room, entity("b", 2, 1)).unwrap();
        assert_eq!(ids(store.range(&room, 0, None)), vec!["b", "a"]);
    }

    #[test_timeout::timeout]
    fn sort_is_descending_and_stable() {
        let mut store = RoomMessageStore::new();
        let room = RoomId::from("!r");
        store.open(&room);
        for (id, ts) in [("old", 1), ("tie-1", 5), ("new", 9), ("tie-2", 5), ("mid", 3)] {
            store.insert(&room, entity(id, ts, 1)).unwrap();
        }
        store.sort_by_timestamp(&room).unwrap();
        // tie-2 was inserted later, so it sat in front of tie-1 before sorting
        assert_eq!(
            ids(store.range(&room, 0, None)),
            vec!["new", "tie-2", "tie-1", "mid", "old"]
        );
    }

    #[test_timeout::timeout]
    fn ranges_clamp_and_stay_live() {
        let mut store = RoomMessageStore::new();
        let room = RoomId::from("!r");
        store.open(&room);
        for (id, ts) in [("a", 1), ("b", 2), ("c", 3)] {
            store.insert(&room, entity(id, ts, 2)).unwrap();
        }
        assert_eq!(ids(store.range(&room, 1, Some(5))), vec!["b", "a"]);
        assert!(store.range(&room, 7, None).is_empty());
        assert!(store.range(&RoomId::from("!other"), 0, None).is_empty());
        assert_eq!(store.total_height(&room), 6);

        store.range_mut(&room, 0, Some(1))[0].lines.clear();
        assert_eq!(store.range(&room, 0, Some(1))[0].height(), 0);
        assert_eq!(store.total_height(&room), 4);

        assert!(store.drop_room(&room));
        assert_eq!(store.len(&room), 0);
        assert!(!store.drop_room(&room));
    }
}
