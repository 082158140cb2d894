//! Events produced by the client itself (command output, help, errors).
//!
//! They travel through the same classification and store pipeline as
//! homeserver events, tagged with `source: "murmur"` so the local-output rules
//! pick them up, and carry a generated `$local-` id for the dedup record.

use super::Event;
use serde_json::{Value, json};
use time::OffsetDateTime;
use uuid::Uuid;

pub const LOCAL_SOURCE: &str = "murmur";
pub const COMMAND_OUTPUT: &str = "n.output.command";
pub const COMMAND_HELP: &str = "n.output.help";
pub const COMMAND_ERROR: &str = "n.output.error";

pub fn command_output(command: &str, message: &str) -> Event {
    build(COMMAND_OUTPUT, command, message)
}

pub fn command_help(command: &str, message: &str) -> Event {
    build(COMMAND_HELP, command, message)
}

pub fn command_error(command: &str, message: &str) -> Event {
    build(COMMAND_ERROR, command, message)
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn build(kind: &str, command: &str, message: &str) -> Event {
    let value: Value = json!({
        "type": kind,
        "source": LOCAL_SOURCE,
        "event_id": format!("$local-{}", Uuid::new_v4()),
        "origin_server_ts": now_millis(),
        "content": {
            "command": command,
            "message": message,
        }
    });
    Event {
        raw: std::sync::Arc::new(match value {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }),
    }
}
