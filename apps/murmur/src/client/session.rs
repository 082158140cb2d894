//! Glue between the transport, the display controller and the composer.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use time::UtcOffset;
use tracing::{debug, info, warn};

use super::ClientError;
use super::commands::{self, Command, Submission};
use super::display::{Backfill, BackfillPage, DisplayController, DisplaySettings};
use crate::event::{Event, local};
use crate::room::RoomId;
use crate::transport::{Inbound, Transport, TransportError, channel_listener};

/// Backfill through the transport. Pages are delivered to the room listeners,
/// so they are collected back out of the shared inbox.
pub struct ChannelBackfill {
    transport: Arc<dyn Transport>,
    inbox: Receiver<Inbound>,
}

impl ChannelBackfill {
    pub fn new(transport: Arc<dyn Transport>, inbox: Receiver<Inbound>) -> Self {
        Self { transport, inbox }
    }
}

impl Backfill for ChannelBackfill {
    fn backfill(&mut self, room: &RoomId, limit: usize) -> Result<BackfillPage, TransportError> {
        let fetched = self.transport.backfill(room, limit)?;
        Ok(BackfillPage {
            fetched,
            delivered: self.inbox.try_iter().collect(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub display: DisplaySettings,
    /// Page size requested right after joining a room; 0 skips it.
    pub initial_backfill: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            display: DisplaySettings::default(),
            initial_backfill: 500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct ChatSession {
    transport: Arc<dyn Transport>,
    display: Mutex<DisplayController>,
    inbox: Receiver<Inbound>,
    outbox: Sender<Inbound>,
    settings: SessionSettings,
    notice: Mutex<Option<String>>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn Transport>, settings: SessionSettings, utc_offset: UtcOffset) -> Self {
        let (outbox, inbox) = unbounded();
        let backfill = ChannelBackfill::new(transport.clone(), inbox.clone());
        let display = DisplayController::new(Box::new(backfill), settings.display, utc_offset);
        Self::with_display(transport, display, settings, outbox, inbox)
    }

    /// Builds a session around a preconfigured controller. `outbox`/`inbox`
    /// must be the channel the controller's backfill drains.
    pub fn with_display(
        transport: Arc<dyn Transport>,
        display: DisplayController,
        settings: SessionSettings,
        outbox: Sender<Inbound>,
        inbox: Receiver<Inbound>,
    ) -> Self {
        Self {
            transport,
            display: Mutex::new(display),
            inbox,
            outbox,
            settings,
            notice: Mutex::new(None),
        }
    }

    pub fn display(&self) -> MutexGuard<'_, DisplayController> {
        self.display.lock()
    }

    /// A message for the status bar when there is no room to print into.
    pub fn notice(&self) -> Option<String> {
        self.notice.lock().clone()
    }

    pub fn user_id(&self) -> String {
        self.transport.user_id()
    }

    /// Joins (or switches to) `room` and makes it the displayed room.
    pub fn join(&self, room: &RoomId) -> Result<(), ClientError> {
        let mut display = self.display.lock();
        if !display.is_open(room) {
            let context = self.transport.join_room(room)?;
            display.open_room(context);
            self.transport
                .add_listener(room, channel_listener(self.outbox.clone()))?;
            info!(target = "client::session", room = %room, "joined room");
            if self.settings.initial_backfill > 0 {
                display.backfill_now(room, self.settings.initial_backfill)?;
            }
        }
        display.change_room(room, true)?;
        *self.notice.lock() = None;
        Ok(())
    }

    /// Leaves `room` (the displayed one when `None`) and shows another open
    /// room if there is one. Returns the room left.
    pub fn leave(&self, room: Option<RoomId>) -> Result<RoomId, ClientError> {
        let mut display = self.display.lock();
        let room = match room.or_else(|| display.current_room().cloned()) {
            Some(room) => room,
            None => return Err(ClientError::NoRoom),
        };
        self.transport.leave_room(&room)?;
        display.close_room(&room);
        info!(target = "client::session", room = %room, "left room");
        if display.current_room().is_none() {
            if let Some(next) = display.open_rooms().into_iter().next() {
                display.change_room(&next, false)?;
            }
        }
        Ok(room)
    }

    /// Applies everything the transport delivered since the last call.
    pub fn pump(&self) -> Result<usize, ClientError> {
        let batch: Vec<Inbound> = self.inbox.try_iter().collect();
        if batch.is_empty() {
            return Ok(0);
        }
        Ok(self.display.lock().apply(batch)?)
    }

    pub fn scroll(&self, delta: isize) -> Result<(), ClientError> {
        Ok(self.display.lock().change_offset(delta)?)
    }

    pub fn jump_to_oldest(&self) -> Result<(), ClientError> {
        Ok(self.display.lock().jump_to_oldest()?)
    }

    pub fn jump_to_newest(&self) -> Result<(), ClientError> {
        Ok(self.display.lock().set_offset(0)?)
    }

    pub fn resize(&self, width: u16, height: u16) -> Result<(), ClientError> {
        Ok(self.display.lock().resize(width, height)?)
    }

    /// Handles one line from the composer.
    pub fn submit(&self, text: &str) -> Result<Flow, ClientError> {
        let command = match commands::parse(text) {
            Ok(Submission::Message(body)) => {
                self.send(&body, false);
                return Ok(Flow::Continue);
            }
            Ok(Submission::Command(command)) => command,
            Err(err) => {
                self.output(local::command_error(err.command(), &err.to_string()))?;
                return Ok(Flow::Continue);
            }
        };
        debug!(target = "client::session", command = command.name(), "running command");
        match command {
            Command::Join(room) => match self.join(&room) {
                Ok(()) => self.output(local::command_output("join", &format!("Joined {room}")))?,
                Err(ClientError::Transport(err)) => {
                    self.output(local::command_error("join", &err.to_string()))?
                }
                Err(err) => return Err(err),
            },
            Command::Leave(room) => match self.leave(room) {
                Ok(room) => self.output(local::command_output("leave", &format!("Left {room}")))?,
                Err(ClientError::Transport(err)) => {
                    self.output(local::command_error("leave", &err.to_string()))?
                }
                Err(ClientError::NoRoom) => {
                    self.output(local::command_error("leave", "You are not in a room."))?
                }
                Err(err) => return Err(err),
            },
            Command::Emote(body) => self.send(&body, true),
            Command::WhoAmI => self.output(local::command_output("whoami", &self.user_id()))?,
            Command::Help(topic) => match commands::help_for(topic.as_deref()) {
                Ok(help) => self.output(local::command_help("help", help))?,
                Err(err) => self.output(local::command_error("help", &err.to_string()))?,
            },
            Command::Commands => {
                self.output(local::command_output("commands", &commands::command_list()))?
            }
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn send(&self, body: &str, emote: bool) {
        let Some(room) = self.display.lock().current_room().cloned() else {
            *self.notice.lock() = Some("Join a room first: /join #room:homeserver.tld".into());
            return;
        };
        let sent = if emote {
            self.transport.send_emote(&room, body)
        } else {
            self.transport.send_text(&room, body)
        };
        if let Err(err) = sent {
            warn!(target = "client::session", room = %room, error = %err, "send failed");
            let label = if emote { "emote" } else { "send" };
            if let Err(err) = self.output(local::command_error(label, &err.to_string())) {
                warn!(target = "client::session", error = %err, "could not show send failure");
            }
        }
    }

    /// Prints a client-generated event into the displayed room.
    fn output(&self, event: Event) -> Result<(), ClientError> {
        let mut display = self.display.lock();
        let Some(room) = display.current_room().cloned() else {
            *self.notice.lock() = event.str_at("content.message").map(str::to_string);
            return Ok(());
        };
        display.apply(vec![Inbound {
            room_id: room,
            event,
        }])?;
        Ok(())
    }
}
