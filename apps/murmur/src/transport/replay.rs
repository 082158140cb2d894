//! In-memory homeserver backed by a JSON fixture.
//!
//! History is served to `backfill` from the newest unserved end of each room's
//! history, delivered synchronously on the calling thread. Every join starts
//! serving from the newest event again. Echoes of sent
//! messages and scheduled `live` events arrive from a dedicated delivery
//! thread, the way a real sync loop calls listeners.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Listener, Transport, TransportError};
use crate::event::Event;
use crate::event::local::now_millis;
use crate::room::{RoomContext, RoomId, RoomState};

#[derive(Debug, Deserialize)]
struct Fixture {
    user_id: String,
    #[serde(default)]
    rooms: Vec<FixtureRoom>,
}

#[derive(Debug, Deserialize)]
struct FixtureRoom {
    room_id: RoomId,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    members: HashMap<String, Option<String>>,
    /// Oldest first.
    #[serde(default)]
    events: Vec<Value>,
    #[serde(default)]
    live: Vec<LiveEvent>,
}

#[derive(Debug, Deserialize)]
struct LiveEvent {
    /// Delay after joining, in milliseconds.
    #[serde(default)]
    after_ms: u64,
    event: Value,
}

struct ReplayRoom {
    state: Arc<RoomState>,
    /// Oldest first; grows with every delivered live event or echo.
    history: Vec<Event>,
    /// History events already handed to the client since the last join,
    /// counted from the newest end.
    served: usize,
    live: Vec<(Duration, Event)>,
    listeners: Vec<Listener>,
    joined: bool,
}

struct Delivery {
    room: RoomId,
    event: Event,
}

pub struct ReplayTransport {
    user_id: String,
    rooms: Arc<Mutex<HashMap<RoomId, ReplayRoom>>>,
    jobs: Sender<Delivery>,
}

impl ReplayTransport {
    pub fn from_path(path: &Path) -> Result<Self, TransportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        let fixture: Fixture =
            serde_json::from_str(text).map_err(|err| TransportError::Fixture(err.to_string()))?;
        let transport = Self::empty(&fixture.user_id)?;
        {
            let mut rooms = transport.rooms.lock();
            for room in fixture.rooms {
                let mut state = RoomState::new(room.room_id.clone()).with_topic(room.topic);
                if let Some(name) = room.name {
                    state = state.with_name(name);
                }
                for (user_id, name) in &room.members {
                    state.set_member(user_id, name.as_deref());
                }
                let history = room
                    .events
                    .into_iter()
                    .map(Event::from_value)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| TransportError::Fixture(err.to_string()))?;
                let live = room
                    .live
                    .into_iter()
                    .map(|live| {
                        Event::from_value(live.event)
                            .map(|event| (Duration::from_millis(live.after_ms), event))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|err| TransportError::Fixture(err.to_string()))?;
                rooms.insert(
                    room.room_id,
                    ReplayRoom {
                        state: Arc::new(state),
                        history,
                        served: 0,
                        live,
                        listeners: Vec::new(),
                        joined: false,
                    },
                );
            }
        }
        Ok(transport)
    }

    /// A homeserver with no rooms; joining creates them on the fly.
    pub fn empty(user_id: &str) -> Result<Self, TransportError> {
        let rooms: Arc<Mutex<HashMap<RoomId, ReplayRoom>>> = Arc::new(Mutex::new(HashMap::new()));
        let (jobs, queue) = unbounded();
        let delivery_rooms = rooms.clone();
        thread::Builder::new()
            .name("replay-delivery".into())
            .spawn(move || run_delivery(queue, delivery_rooms))?;
        Ok(Self {
            user_id: user_id.to_string(),
            rooms,
            jobs,
        })
    }

    pub fn room(&self, room: &RoomId) -> Option<Arc<RoomState>> {
        self.rooms.lock().get(room).map(|entry| entry.state.clone())
    }

    /// Number of history events not yet served since the last join.
    pub fn remaining_history(&self, room: &RoomId) -> usize {
        self.rooms
            .lock()
            .get(room)
            .map_or(0, |entry| entry.history.len() - entry.served)
    }

    fn send_message(
        &self,
        room: &RoomId,
        msgtype: &str,
        text: &str,
    ) -> Result<String, TransportError> {
        {
            let rooms = self.rooms.lock();
            let entry = rooms
                .get(room)
                .ok_or_else(|| TransportError::UnknownRoom(room.clone()))?;
            if !entry.joined {
                return Err(TransportError::NotJoined(room.clone()));
            }
        }
        let event_id = format!("$replay-{}", Uuid::new_v4());
        let event = Event::from_value(json!({
            "event_id": event_id,
            "type": "m.room.message",
            "sender": self.user_id,
            "origin_server_ts": now_millis(),
            "content": { "msgtype": msgtype, "body": text },
        }))
        .map_err(|err| TransportError::Rejected(err.to_string()))?;
        self.jobs
            .send(Delivery {
                room: room.clone(),
                event,
            })
            .map_err(|_| TransportError::Rejected("delivery thread stopped".into()))?;
        Ok(event_id)
    }

    fn schedule_live(&self, room: &RoomId, live: Vec<(Duration, Event)>) {
        if live.is_empty() {
            return;
        }
        let jobs = self.jobs.clone();
        let room = room.clone();
        let mut live = live;
        live.sort_by_key(|(due, _)| *due);
        let spawned = thread::Builder::new()
            .name("replay-live".into())
            .spawn(move || {
                let joined_at = Instant::now();
                for (due, event) in live {
                    thread::sleep(due.saturating_sub(joined_at.elapsed()));
                    if jobs
                        .send(Delivery {
                            room: room.clone(),
                            event,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(target = "client::transport", error = %err, "could not schedule live events");
        }
    }
}

fn run_delivery(queue: Receiver<Delivery>, rooms: Arc<Mutex<HashMap<RoomId, ReplayRoom>>>) {
    for Delivery { room, event } in queue {
        let listeners = {
            let mut rooms = rooms.lock();
            match rooms.get_mut(&room) {
                Some(entry) if entry.joined => {
                    entry.state.apply_state(&event);
                    entry.history.push(event.clone());
                    entry.served += 1;
                    entry.listeners.clone()
                }
                _ => continue,
            }
        };
        debug!(
            target = "client::transport",
            room = %room,
            event_id = ?event.event_id(),
            listeners = listeners.len(),
            "delivering event"
        );
        for listener in listeners {
            listener(room.clone(), event.clone());
        }
    }
}

impl Transport for ReplayTransport {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn join_room(&self, room: &RoomId) -> Result<Arc<dyn RoomContext>, TransportError> {
        if !room.as_str().starts_with(['!', '#']) {
            return Err(TransportError::Rejected(format!(
                "{room} is not a room id or alias"
            )));
        }
        let (state, live) = {
            let mut rooms = self.rooms.lock();
            let entry = rooms
                .entry(room.clone())
                .or_insert_with(|| new_room(room, &self.user_id));
            if entry.joined {
                return Ok(entry.state.clone());
            }
            entry.joined = true;
            entry.served = 0;
            (entry.state.clone(), std::mem::take(&mut entry.live))
        };
        debug!(target = "client::transport", room = %room, "joined room");
        self.schedule_live(room, live);
        Ok(state)
    }

    fn leave_room(&self, room: &RoomId) -> Result<(), TransportError> {
        let mut rooms = self.rooms.lock();
        let entry = rooms
            .get_mut(room)
            .ok_or_else(|| TransportError::UnknownRoom(room.clone()))?;
        if !entry.joined {
            return Err(TransportError::NotJoined(room.clone()));
        }
        entry.joined = false;
        entry.listeners.clear();
        Ok(())
    }

    fn send_text(&self, room: &RoomId, text: &str) -> Result<String, TransportError> {
        self.send_message(room, "m.text", text)
    }

    fn send_emote(&self, room: &RoomId, text: &str) -> Result<String, TransportError> {
        self.send_message(room, "m.emote", text)
    }

    fn backfill(&self, room: &RoomId, limit: usize) -> Result<usize, TransportError> {
        let (page, listeners) = {
            let mut rooms = self.rooms.lock();
            let entry = rooms
                .get_mut(room)
                .ok_or_else(|| TransportError::UnknownRoom(room.clone()))?;
            if !entry.joined {
                return Err(TransportError::NotJoined(room.clone()));
            }
            let unserved = entry.history.len() - entry.served;
            let start = unserved.saturating_sub(limit);
            let page = entry.history[start..unserved].to_vec();
            entry.served += page.len();
            (page, entry.listeners.clone())
        };
        debug!(
            target = "client::transport",
            room = %room,
            limit,
            fetched = page.len(),
            "backfill"
        );
        for event in &page {
            for listener in &listeners {
                listener(room.clone(), event.clone());
            }
        }
        Ok(page.len())
    }

    fn add_listener(&self, room: &RoomId, listener: Listener) -> Result<(), TransportError> {
        let mut rooms = self.rooms.lock();
        let entry = rooms
            .get_mut(room)
            .ok_or_else(|| TransportError::UnknownRoom(room.clone()))?;
        entry.listeners.push(listener);
        Ok(())
    }
}

/// A freshly created room: its history holds only the creation and the
/// creator's join.
fn new_room(room: &RoomId, user_id: &str) -> ReplayRoom {
    let now = now_millis();
    let history = [
        json!({
            "event_id": format!("$replay-{}", Uuid::new_v4()),
            "type": "m.room.create",
            "sender": user_id,
            "state_key": "",
            "origin_server_ts": now,
            "content": { "creator": user_id },
        }),
        json!({
            "event_id": format!("$replay-{}", Uuid::new_v4()),
            "type": "m.room.member",
            "sender": user_id,
            "state_key": user_id,
            "origin_server_ts": now,
            "content": { "membership": "join" },
        }),
    ];
    ReplayRoom {
        state: Arc::new(RoomState::new(room.clone()).with_member(user_id, None)),
        history: history.into_iter().filter_map(|value| Event::from_value(value).ok()).collect(),
        served: 0,
        live: Vec::new(),
        listeners: Vec::new(),
        joined: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Inbound, channel_listener};

    const FIXTURE: &str = r##"{
        "user_id": "@me:example.org",
        "rooms": [{
            "room_id": "!lobby:example.org",
            "name": "Lobby",
            "topic": "say hi",
            "members": { "@me:example.org": "Me", "@ann:example.org": "Ann" },
            "events": [
                { "event_id": "$1", "type": "m.room.message", "sender": "@ann:example.org",
                  "origin_server_ts": 1, "content": { "msgtype": "m.text", "body": "one" } },
                { "event_id": "$2", "type": "m.room.message", "sender": "@ann:example.org",
                  "origin_server_ts": 2, "content": { "msgtype": "m.text", "body": "two" } },
                { "event_id": "$3", "type": "m.room.message", "sender": "@ann:example.org",
                  "origin_server_ts": 3, "content": { "msgtype": "m.text", "body": "three" } }
            ]
        }]
    }"##;

    fn lobby() -> RoomId {
        RoomId::from("!lobby:example.org")
    }

    fn ids(rx: &Receiver<Inbound>) -> Vec<String> {
        rx.try_iter()
            .filter_map(|inbound| inbound.event.event_id().map(str::to_string))
            .collect()
    }

    #[test_timeout::timeout]
    fn backfill_serves_newest_pages_first_and_then_exhausts() {
        let transport = ReplayTransport::from_json(FIXTURE).unwrap();
        let room = transport.join_room(&lobby()).unwrap();
        assert_eq!(room.display_name(), "Lobby");
        assert_eq!(room.member_name("@ann:example.org").as_deref(), Some("Ann"));

        let (tx, rx) = unbounded();
        transport.add_listener(&lobby(), channel_listener(tx)).unwrap();

        assert_eq!(transport.backfill(&lobby(), 2).unwrap(), 2);
        assert_eq!(ids(&rx), vec!["$2", "$3"]);
        assert_eq!(transport.backfill(&lobby(), 2).unwrap(), 1);
        assert_eq!(ids(&rx), vec!["$1"]);
        assert_eq!(transport.backfill(&lobby(), 2).unwrap(), 0);
    }

    #[test_timeout::timeout]
    fn sent_messages_echo_from_the_delivery_thread() {
        let transport = ReplayTransport::from_json(FIXTURE).unwrap();
        assert!(matches!(
            transport.send_text(&lobby(), "early"),
            Err(TransportError::NotJoined(_))
        ));
        transport.join_room(&lobby()).unwrap();
        let (tx, rx) = unbounded();
        transport.add_listener(&lobby(), channel_listener(tx)).unwrap();

        let id = transport.send_emote(&lobby(), "waves").unwrap();
        let inbound = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(inbound.event.event_id(), Some(id.as_str()));
        assert_eq!(inbound.event.str_at("content.msgtype"), Some("m.emote"));
        assert_eq!(inbound.event.sender(), Some("@me:example.org"));
    }

    #[test_timeout::timeout]
    fn joining_an_unknown_room_creates_it() {
        let transport = ReplayTransport::empty("@me:example.org").unwrap();
        let room_id = RoomId::from("#new:example.org");
        transport.join_room(&room_id).unwrap();
        assert_eq!(transport.remaining_history(&room_id), 2);
        assert!(matches!(
            transport.join_room(&RoomId::from("lobby")),
            Err(TransportError::Rejected(_))
        ));
    }

    #[test_timeout::timeout]
    fn left_rooms_stop_delivering() {
        let transport = ReplayTransport::from_json(FIXTURE).unwrap();
        transport.join_room(&lobby()).unwrap();
        let (tx, rx) = unbounded();
        transport.add_listener(&lobby(), channel_listener(tx)).unwrap();
        transport.leave_room(&lobby()).unwrap();
        assert!(matches!(
            transport.backfill(&lobby(), 5),
            Err(TransportError::NotJoined(_))
        ));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test_timeout::timeout]
    fn rejoining_serves_the_history_again() {
        let transport = ReplayTransport::from_json(FIXTURE).unwrap();
        transport.join_room(&lobby()).unwrap();
        let (tx, rx) = unbounded();
        transport.add_listener(&lobby(), channel_listener(tx)).unwrap();
        let echo = transport.send_text(&lobby(), "four").unwrap();
        let echoed = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(echoed.event.event_id(), Some(echo.as_str()));
        assert_eq!(transport.backfill(&lobby(), 10).unwrap(), 3);
        assert_eq!(transport.remaining_history(&lobby()), 0);
        transport.leave_room(&lobby()).unwrap();

        transport.join_room(&lobby()).unwrap();
        let (tx, rx) = unbounded();
        transport.add_listener(&lobby(), channel_listener(tx)).unwrap();
        assert_eq!(transport.remaining_history(&lobby()), 4);
        assert_eq!(transport.backfill(&lobby(), 2).unwrap(), 2);
        assert_eq!(ids(&rx), vec!["$3".to_string(), echo]);
    }

    #[test_timeout::timeout]
    fn bad_fixtures_are_rejected() {
        let err = ReplayTransport::from_json(r#"{ "rooms": [] }"#).err().unwrap();
        assert!(matches!(err, TransportError::Fixture(_)));
        let err = ReplayTransport::from_json(
            r#"{ "user_id": "@me:x", "rooms": [{ "room_id": "!a:x", "events": [1] }] }"#,
        )
        .err()
        .unwrap();
        assert!(matches!(err, TransportError::Fixture(_)));
    }
}
