//! Room histories, scroll positions and the visible page of the current room.
//!
//! All mutation happens through `DisplayController`, which the session keeps
//! behind a single lock: dedup, classification, store insertion and painting
//! for one event never interleave with another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use time::{Date, UtcOffset};
use tracing::{debug, trace, warn};

use super::viewport::{self, Paint, ViewportState};
use crate::event::Event;
use crate::render::{Catalog, RenderContext};
use crate::room::{RoomContext, RoomId};
use crate::store::{CoreError, DedupQueue, RenderedEntity, RoomMessageStore};
use crate::transport::{Inbound, TransportError};

/// Result of one backfill request.
#[derive(Debug, Default)]
pub struct BackfillPage {
    /// Events the transport reported fetching; 0 means the history is exhausted.
    pub fetched: usize,
    /// Everything delivered to the client while the request ran, in arrival order.
    pub delivered: Vec<Inbound>,
}

/// Source of older history for the viewport.
pub trait Backfill: Send {
    fn backfill(&mut self, room: &RoomId, limit: usize) -> Result<BackfillPage, TransportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplaySettings {
    /// Backfill while fewer than this many screens of entities remain below
    /// the offset.
    pub lookahead_screens: usize,
    /// Page size of a backfill request, in screens.
    pub backfill_screens: usize,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            lookahead_screens: 5,
            backfill_screens: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ingest {
    Duplicate,
    Stored,
}

struct RoomSlot {
    context: Arc<dyn RoomContext>,
    view: ViewportState,
    names_dirty: bool,
}

/// Snapshot for the status bar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomStatus {
    pub room_id: RoomId,
    pub name: String,
    pub topic: String,
    pub offset: usize,
    pub loaded: usize,
    pub exhausted: bool,
}

pub struct DisplayController {
    catalog: Catalog,
    dedup: DedupQueue,
    store: RoomMessageStore,
    rooms: HashMap<RoomId, RoomSlot>,
    current: Option<RoomId>,
    width: u16,
    height: u16,
    utc_offset: UtcOffset,
    fixed_date: Option<Date>,
    settings: DisplaySettings,
    backfill: Box<dyn Backfill>,
    painted: Paint,
}

impl DisplayController {
    pub fn new(backfill: Box<dyn Backfill>, settings: DisplaySettings, utc_offset: UtcOffset) -> Self {
        Self {
            catalog: Catalog::standard(),
            dedup: DedupQueue::new(),
            store: RoomMessageStore::new(),
            rooms: HashMap::new(),
            current: None,
            width: 80,
            height: 24,
            utc_offset,
            fixed_date: None,
            settings,
            backfill,
            painted: Paint::default(),
        }
    }

    /// Renders timestamps as if `date` were today.
    pub fn with_fixed_date(mut self, date: Date) -> Self {
        self.fixed_date = Some(date);
        self
    }

    fn render_context(&self) -> RenderContext {
        match self.fixed_date {
            Some(today) => RenderContext::fixed(self.width, self.utc_offset, today),
            None => RenderContext::now(self.width, self.utc_offset),
        }
    }

    pub fn open_room(&mut self, context: Arc<dyn RoomContext>) {
        let room = context.room_id().clone();
        self.store.open(&room);
        let view = ViewportState {
            width: self.width,
            height: self.height,
            ..ViewportState::default()
        };
        self.rooms.entry(room).or_insert(RoomSlot {
            context,
            view,
            names_dirty: false,
        });
    }

    /// Drops the room's history and dedup record. If it was displayed,
    /// nothing is displayed afterwards.
    pub fn close_room(&mut self, room: &RoomId) -> bool {
        let known = self.rooms.remove(room).is_some();
        self.store.drop_room(room);
        self.dedup.forget_room(room);
        if self.current.as_ref() == Some(room) {
            self.current = None;
            self.painted = Paint::default();
        }
        known
    }

    pub fn is_open(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    pub fn current_room(&self) -> Option<&RoomId> {
        self.current.as_ref()
    }

    pub fn open_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.rooms.keys().cloned().collect();
        rooms.sort();
        rooms
    }

    pub fn view(&self, room: &RoomId) -> Option<&ViewportState> {
        self.rooms.get(room).map(|slot| &slot.view)
    }

    pub fn store(&self) -> &RoomMessageStore {
        &self.store
    }

    pub fn painted(&self) -> &Paint {
        &self.painted
    }

    pub fn status(&self) -> Option<RoomStatus> {
        let room = self.current.as_ref()?;
        let slot = self.rooms.get(room)?;
        Some(RoomStatus {
            room_id: room.clone(),
            name: slot.context.display_name(),
            topic: slot.context.topic(),
            offset: slot.view.offset,
            loaded: self.store.len(room),
            exhausted: slot.view.exhausted,
        })
    }

    /// Dedups, classifies and stores one event. Does not sort or repaint.
    pub fn handle_event(&mut self, room: &RoomId, event: Event) -> Result<Ingest, CoreError> {
        let event_id = event.event_id().ok_or(CoreError::MissingEventId)?;
        if !self.rooms.contains_key(room) {
            return Err(CoreError::UnknownRoom(room.clone()));
        }
        if self.dedup.check_and_mark(room, event_id) {
            trace!(target = "client::display", event_id, "duplicate event");
            return Ok(Ingest::Duplicate);
        }
        let variant = self.catalog.classify(&event)?;
        let ctx = self.render_context();
        let slot = self
            .rooms
            .get_mut(room)
            .ok_or_else(|| CoreError::UnknownRoom(room.clone()))?;
        let lines = self
            .catalog
            .materialize(&event, variant, slot.context.as_ref(), &ctx);
        if variant.affects_names() {
            slot.names_dirty = true;
        }
        self.store
            .insert(room, RenderedEntity::new(event, variant, lines, ctx.width))?;
        Ok(Ingest::Stored)
    }

    /// Ingests a batch of deliveries, re-sorts the rooms that received new
    /// entities and refreshes the displayed room. Returns the number stored.
    ///
    /// Deliveries for rooms that are not open are skipped.
    pub fn apply(&mut self, batch: Vec<Inbound>) -> Result<usize, CoreError> {
        let (stored, touched) = self.ingest(batch)?;
        for room in &touched {
            self.store.sort_by_timestamp(room)?;
        }
        let displayed = self
            .current
            .as_ref()
            .is_some_and(|room| touched.contains(room));
        if displayed {
            self.settle(true)?;
        }
        Ok(stored)
    }

    fn ingest(&mut self, batch: Vec<Inbound>) -> Result<(usize, HashSet<RoomId>), CoreError> {
        let mut stored = 0;
        let mut touched = HashSet::new();
        for Inbound { room_id, event } in batch {
            match self.handle_event(&room_id, event) {
                Ok(Ingest::Stored) => {
                    stored += 1;
                    touched.insert(room_id);
                }
                Ok(Ingest::Duplicate) => {}
                Err(CoreError::UnknownRoom(room)) => {
                    debug!(target = "client::display", room = %room, "event for a room that is not open");
                }
                Err(CoreError::MissingEventId) => {
                    warn!(target = "client::display", room = %room_id, "dropping event without event_id");
                }
                Err(err) => return Err(err),
            }
        }
        Ok((stored, touched))
    }

    /// Switches the displayed room. Re-selecting the displayed room jumps
    /// back to the newest entity.
    pub fn change_room(&mut self, room: &RoomId, sort_first: bool) -> Result<(), CoreError> {
        if !self.rooms.contains_key(room) {
            return Err(CoreError::UnknownRoom(room.clone()));
        }
        if sort_first {
            self.store.sort_by_timestamp(room)?;
        }
        if let Some(slot) = self.rooms.get_mut(room) {
            if self.current.as_ref() == Some(room) {
                slot.view.offset = 0;
            }
        }
        self.current = Some(room.clone());
        self.reflow(room);
        self.settle(true)
    }

    /// Scrolls by `delta` entities; positive is older.
    pub fn change_offset(&mut self, delta: isize) -> Result<(), CoreError> {
        let Some(slot) = self.current_slot_mut() else {
            return Ok(());
        };
        slot.view.offset = slot.view.offset.saturating_add_signed(delta);
        self.settle(true)
    }

    /// Moves to `offset` without requesting history.
    pub fn set_offset(&mut self, offset: usize) -> Result<(), CoreError> {
        let Some(slot) = self.current_slot_mut() else {
            return Ok(());
        };
        slot.view.offset = offset;
        self.settle(false)
    }

    /// Scrolls to the oldest loaded page.
    pub fn jump_to_oldest(&mut self) -> Result<(), CoreError> {
        let Some(room) = self.current.clone() else {
            return Ok(());
        };
        let len = self.store.len(&room);
        self.set_offset(len)
    }

    /// New history viewport size; entities are rewrapped to the new width.
    pub fn resize(&mut self, width: u16, height: u16) -> Result<(), CoreError> {
        let width = width.max(1);
        if width == self.width && height == self.height {
            return Ok(());
        }
        debug!(target = "client::display", width, height, "viewport resized");
        self.width = width;
        self.height = height;
        for slot in self.rooms.values_mut() {
            slot.view.width = width;
            slot.view.height = height;
        }
        match self.current.clone() {
            Some(room) => {
                self.reflow(&room);
                self.settle(true)
            }
            None => Ok(()),
        }
    }

    /// Requests one page of `limit` older events for `room` right away, e.g.
    /// right after joining. Returns the number of events fetched. A page with
    /// nothing new for the room marks it exhausted.
    pub fn backfill_now(&mut self, room: &RoomId, limit: usize) -> Result<usize, CoreError> {
        if !self.rooms.contains_key(room) {
            return Err(CoreError::UnknownRoom(room.clone()));
        }
        let page = match self.backfill.backfill(room, limit.max(1)) {
            Ok(page) => page,
            Err(err) => {
                warn!(target = "client::display", room = %room, error = %err, "backfill failed");
                return Ok(0);
            }
        };
        let fetched = page.fetched;
        let before = self.store.len(room);
        self.apply(page.delivered)?;
        if self.store.len(room) == before {
            self.mark_exhausted(room);
        }
        Ok(fetched)
    }

    /// Re-runs backfill and correction for the displayed room and repaints it.
    pub fn refresh(&mut self) -> Result<(), CoreError> {
        self.settle(true)
    }

    fn mark_exhausted(&mut self, room: &RoomId) {
        if let Some(slot) = self.rooms.get_mut(room) {
            slot.view.exhausted = true;
            debug!(target = "client::display", room = %room, "history exhausted");
        }
    }

    fn current_slot_mut(&mut self) -> Option<&mut RoomSlot> {
        let room = self.current.as_ref()?;
        self.rooms.get_mut(room)
    }

    /// Rebuilds entities built at another width, or all of them once member
    /// names changed.
    fn reflow(&mut self, room: &RoomId) {
        let ctx = self.render_context();
        let Some(slot) = self.rooms.get_mut(room) else {
            return;
        };
        let everything = std::mem::take(&mut slot.names_dirty);
        let mut rebuilt = 0usize;
        for entity in self.store.range_mut(room, 0, None) {
            if everything || entity.width != ctx.width {
                entity.lines =
                    self.catalog
                        .materialize(&entity.event, entity.variant, slot.context.as_ref(), &ctx);
                entity.width = ctx.width;
                rebuilt += 1;
            }
        }
        if rebuilt > 0 {
            trace!(target = "client::display", room = %room, rebuilt, "rebuilt entities");
        }
    }

    /// Brings the displayed room into a consistent state: requests history
    /// while the page has room for it, pulls the offset back while blank
    /// space shows above real content, then paints.
    fn settle(&mut self, allow_backfill: bool) -> Result<(), CoreError> {
        let Some(room) = self.current.clone() else {
            self.painted = Paint::default();
            return Ok(());
        };
        self.reflow(&room);
        let height = usize::from(self.height);

        if allow_backfill {
            self.fill_history(&room, height)?;
        }

        let len = self.store.len(&room);
        let screenful = self.store.total_height(&room) >= height;
        let Some(slot) = self.rooms.get_mut(&room) else {
            return Err(CoreError::UnknownRoom(room.clone()));
        };
        slot.view.offset = slot.view.offset.min(len);
        let mut top_space =
            viewport::measure_top_space(self.store.range(&room, slot.view.offset, None), height);
        while top_space > 1 && screenful && slot.view.offset > 0 {
            slot.view.offset -= 1;
            top_space =
                viewport::measure_top_space(self.store.range(&room, slot.view.offset, None), height);
        }
        self.painted = viewport::paint(self.store.range(&room, slot.view.offset, None), height);
        trace!(
            target = "client::display",
            room = %room,
            offset = slot.view.offset,
            top_space = self.painted.top_space,
            "painted"
        );
        Ok(())
    }

    fn fill_history(&mut self, room: &RoomId, height: usize) -> Result<(), CoreError> {
        let limit = (self.settings.backfill_screens * height).max(1);
        let lookahead = self.settings.lookahead_screens * height;
        loop {
            let Some(slot) = self.rooms.get(room) else {
                return Ok(());
            };
            if slot.view.exhausted {
                return Ok(());
            }
            let offset = slot.view.offset.min(self.store.len(room));
            let below = self.store.len(room) - offset;
            let top_space = viewport::measure_top_space(self.store.range(room, offset, None), height);
            if top_space == 0 && below >= lookahead {
                return Ok(());
            }

            let page = match self.backfill.backfill(room, limit) {
                Ok(page) => page,
                Err(err) => {
                    warn!(target = "client::display", room = %room, error = %err, "backfill failed");
                    return Ok(());
                }
            };
            debug!(
                target = "client::display",
                room = %room,
                limit,
                fetched = page.fetched,
                delivered = page.delivered.len(),
                "backfill page"
            );
            let (_, touched) = self.ingest(page.delivered)?;
            for other in &touched {
                self.store.sort_by_timestamp(other)?;
            }
            if page.fetched == 0 || !touched.contains(room) {
                self.mark_exhausted(room);
                return Ok(());
            }
            self.reflow(room);
        }
    }
}
