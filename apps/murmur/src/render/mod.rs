pub mod matcher;
pub mod text;
pub mod variants;

pub use matcher::ClassificationError;
pub use variants::Variant;

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{trace, warn};

use crate::event::Event;
use crate::room::RoomContext;
use matcher::RuleTree;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Normal,
    Emphasized,
    Dimmed,
    Alert,
}

impl Tone {
    pub fn style(self) -> Style {
        match self {
            Tone::Normal => Style::default(),
            Tone::Emphasized => Style::default().add_modifier(Modifier::BOLD),
            Tone::Dimmed => Style::default().fg(Color::DarkGray),
            Tone::Alert => Style::default().fg(Color::Red),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub tone: Tone,
}

impl Fragment {
    pub fn new(text: impl Into<String>, tone: Tone) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }
}

/// Everything a variant needs besides the event and room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderContext {
    pub width: u16,
    pub offset: UtcOffset,
    pub today: Date,
}

impl RenderContext {
    /// Context for the current local date. `offset` must be resolved before
    /// any threads are spawned; see `main`.
    pub fn now(width: u16, offset: UtcOffset) -> Self {
        let today = OffsetDateTime::now_utc().to_offset(offset).date();
        Self {
            width,
            offset,
            today,
        }
    }

    pub fn fixed(width: u16, offset: UtcOffset, today: Date) -> Self {
        Self {
            width,
            offset,
            today,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("timestamp {0} is out of range")]
    Timestamp(i64),
}

/// The standard rule tree plus the glue turning a selected variant into lines.
pub struct Catalog {
    tree: RuleTree<Variant>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalog {
    pub fn standard() -> Self {
        Self {
            tree: variants::standard_tree(),
        }
    }

    pub fn tree(&self) -> &RuleTree<Variant> {
        &self.tree
    }

    pub fn classify(&self, event: &Event) -> Result<Variant, ClassificationError> {
        let node = self.tree.select_node(event)?;
        trace!(
            target = "client::render",
            event_id = ?event.event_id(),
            rule = ?self.tree.path(node),
            "classified event"
        );
        Ok(*self.tree.rule(node).value())
    }

    /// Renders `event` under `variant` and wraps it to `ctx.width`.
    ///
    /// Never fails: a malformed event becomes a single diagnostic line.
    pub fn materialize(
        &self,
        event: &Event,
        variant: Variant,
        room: &dyn RoomContext,
        ctx: &RenderContext,
    ) -> Vec<Line<'static>> {
        match variant.render(event, room, ctx) {
            Ok(fragments) => text::wrap(&fragments, ctx.width),
            Err(err) => {
                let id = event.event_id().unwrap_or("<no id>");
                warn!(
                    target = "client::render",
                    event_id = id,
                    variant = ?variant,
                    error = %err,
                    "could not render event"
                );
                let diagnostic =
                    Fragment::new(format!("could not render event {id}: {err}"), Tone::Alert);
                text::wrap(&[diagnostic], ctx.width)
            }
        }
    }
}
