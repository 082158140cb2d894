use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::text::Line;
use ratatui::widgets::Widget;

use crate::store::RenderedEntity;

/// Per-room scroll position and history state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewportState {
    /// Number of newest entities skipped; 0 shows the newest.
    pub offset: usize,
    pub width: u16,
    pub height: u16,
    /// Set once backfill reported no older history.
    pub exhausted: bool,
}

/// The visible part of a room, top to bottom, bottom-aligned in the viewport.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Paint {
    pub lines: Vec<Line<'static>>,
    /// Blank lines above the topmost painted content.
    pub top_space: usize,
}

/// Fills `height` lines from the newest entity of `entities` upward.
///
/// `entities` is newest first and already starts at the scroll offset. The
/// oldest entity that only partly fits is clipped at its top.
pub fn paint(entities: &[RenderedEntity], height: usize) -> Paint {
    let mut remaining = height;
    let mut blocks: Vec<&[Line<'static>]> = Vec::new();
    for entity in entities {
        if remaining == 0 {
            break;
        }
        let lines = entity.lines.as_slice();
        if lines.is_empty() {
            continue;
        }
        let shown = lines.len().min(remaining);
        blocks.push(&lines[lines.len() - shown..]);
        remaining -= shown;
    }
    let lines = blocks
        .into_iter()
        .rev()
        .flat_map(|block| block.iter().cloned())
        .collect();
    Paint {
        lines,
        top_space: remaining,
    }
}

/// Same as `paint(..).top_space` without cloning any lines.
pub fn measure_top_space(entities: &[RenderedEntity], height: usize) -> usize {
    let mut remaining = height;
    for entity in entities {
        if remaining == 0 {
            break;
        }
        remaining = remaining.saturating_sub(entity.height());
    }
    remaining
}

pub struct HistoryWidget<'a> {
    paint: &'a Paint,
}

impl<'a> HistoryWidget<'a> {
    pub fn new(paint: &'a Paint) -> Self {
        Self { paint }
    }
}

impl Widget for HistoryWidget<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // Content is bottom-aligned; anything beyond the area is clipped at the top.
        let rows = usize::from(area.height);
        let skip = self.paint.lines.len().saturating_sub(rows);
        let first_row = rows.saturating_sub(self.paint.lines.len());
        for (index, line) in self.paint.lines.iter().skip(skip).enumerate() {
            let y = area.y + (first_row + index) as u16;
            buf.set_line(area.x, y, line, area.width);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::render::Variant;
    use crate::render::text::line_text;
    use serde_json::json;

    fn entity(id: &str, height: usize) -> RenderedEntity {
        let event = Event::from_value(json!({ "event_id": id })).unwrap();
        let lines = (0..height)
            .map(|row| Line::from(format!("{id}.{row}")))
            .collect();
        RenderedEntity::new(event, Variant::Unknown, lines, 20)
    }

    fn texts(paint: &Paint) -> Vec<String> {
        paint.lines.iter().map(line_text).collect()
    }

    #[test_timeout::timeout]
    fn two_newest_of_three_fill_a_two_line_viewport() {
        let entities = [entity("c", 1), entity("b", 1), entity("a", 1)];
        let painted = paint(&entities, 2);
        assert_eq!(texts(&painted), vec!["b.0", "c.0"]);
        assert_eq!(painted.top_space, 0);
    }

    #[test_timeout::timeout]
    fn tall_entities_are_clipped_at_the_top() {
        let entities = [entity("new", 2), entity("old", 3)];
        let painted = paint(&entities, 4);
        assert_eq!(texts(&painted), vec!["old.1", "old.2", "new.0", "new.1"]);
        assert_eq!(painted.top_space, 0);
    }

    #[test_timeout::timeout]
    fn zero_height_entities_take_no_space() {
        let entities = [entity("a", 1), entity("hidden", 0), entity("b", 1)];
        let painted = paint(&entities, 5);
        assert_eq!(texts(&painted), vec!["b.0", "a.0"]);
        assert_eq!(painted.top_space, 3);
        assert_eq!(measure_top_space(&entities, 5), 3);
    }

    #[test_timeout::timeout]
    fn empty_history_reports_full_height() {
        let painted = paint(&[], 7);
        assert!(painted.lines.is_empty());
        assert_eq!(painted.top_space, 7);
        assert_eq!(measure_top_space(&[], 7), 7);
    }

    #[test_timeout::timeout]
    fn widget_bottom_aligns_content() {
        let entities = [entity("b", 1), entity("a", 1)];
        let painted = paint(&entities, 4);
        let area = Rect::new(0, 0, 5, 4);
        let mut buf = Buffer::empty(area);
        HistoryWidget::new(&painted).render(area, &mut buf);
        let row = |y: u16| -> String {
            (0..area.width)
                .map(|x| buf.content[usize::from(y * area.width + x)].symbol())
                .collect()
        };
        assert_eq!(row(0), "     ");
        assert_eq!(row(1), "     ");
        assert_eq!(row(2), "a.0  ");
        assert_eq!(row(3), "b.0  ");
    }
}
