use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::event::Event;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RoomId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Read-only view of a joined room, owned by the transport.
///
/// Member names are looked up every time an entity is rendered, so
/// implementations must reflect the latest known state.
pub trait RoomContext: Send + Sync {
    fn room_id(&self) -> &RoomId;
    fn display_name(&self) -> String;
    fn topic(&self) -> String;
    fn member_name(&self, user_id: &str) -> Option<String>;
}

#[derive(Debug, Default)]
struct RoomMeta {
    name: Option<String>,
    topic: String,
    members: HashMap<String, Option<String>>,
}

/// In-memory room state used by the replay transport and tests.
#[derive(Debug)]
pub struct RoomState {
    id: RoomId,
    meta: RwLock<RoomMeta>,
}

impl RoomState {
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            meta: RwLock::new(RoomMeta::default()),
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.meta.write().name = Some(name.into());
        self
    }

    pub fn with_topic(self, topic: impl Into<String>) -> Self {
        self.meta.write().topic = topic.into();
        self
    }

    pub fn with_member(self, user_id: &str, display_name: Option<&str>) -> Self {
        self.set_member(user_id, display_name);
        self
    }

    pub fn set_member(&self, user_id: &str, display_name: Option<&str>) {
        self.meta
            .write()
            .members
            .insert(user_id.to_string(), display_name.map(str::to_string));
    }

    pub fn set_name(&self, name: Option<&str>) {
        self.meta.write().name = name.map(str::to_string);
    }

    pub fn set_topic(&self, topic: &str) {
        self.meta.write().topic = topic.to_string();
    }

    /// Folds a live state event into the room metadata.
    pub fn apply_state(&self, event: &Event) {
        match event.kind() {
            Some("m.room.member") => {
                if let Some(user_id) = event.state_key() {
                    let name = event.str_at("content.displayname");
                    self.set_member(user_id, name);
                }
            }
            Some("m.room.name") => self.set_name(event.str_at("content.name")),
            Some("m.room.topic") => {
                self.set_topic(event.str_at("content.topic").unwrap_or_default())
            }
            _ => {}
        }
    }
}

impl RoomContext for RoomState {
    fn room_id(&self) -> &RoomId {
        &self.id
    }

    fn display_name(&self) -> String {
        self.meta
            .read()
            .name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    fn topic(&self) -> String {
        self.meta.read().topic.clone()
    }

    fn member_name(&self, user_id: &str) -> Option<String> {
        self.meta.read().members.get(user_id).cloned().flatten()
    }
}
