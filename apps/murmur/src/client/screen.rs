use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph};

use super::display::RoomStatus;
use super::input::{Composer, Mode};
use super::viewport::{HistoryWidget, Paint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenLayout {
    pub status: Rect,
    pub history: Rect,
    pub input: Rect,
}

/// Status bar on top, composer (with a separator line) at the bottom,
/// history in between.
pub fn layout(area: Rect, input_height: u16) -> ScreenLayout {
    let input_height = input_height.max(1).saturating_add(1);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(input_height),
        ])
        .split(area);
    ScreenLayout {
        status: chunks[0],
        history: chunks[1],
        input: chunks[2],
    }
}

pub struct ScreenView<'a> {
    pub status: Option<RoomStatus>,
    pub notice: Option<String>,
    pub mode: Mode,
    pub paint: &'a Paint,
    pub composer: &'a Composer,
    pub input_height: u16,
}

pub fn draw(frame: &mut Frame<'_>, view: &ScreenView<'_>) {
    let areas = layout(frame.area(), view.input_height);
    frame.render_widget(status_line(view), areas.status);
    frame.render_widget(HistoryWidget::new(view.paint), areas.history);

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(areas.input);
    frame.render_widget(block, areas.input);

    let (row, col) = view.composer.cursor_position();
    let scroll = row.saturating_sub(usize::from(inner.height).saturating_sub(1));
    let rows: Vec<Line> = view
        .composer
        .rows()
        .into_iter()
        .skip(scroll)
        .map(Line::from)
        .collect();
    frame.render_widget(Paragraph::new(rows), inner);

    if view.mode == Mode::Compose && inner.height > 0 {
        let x = inner.x + (col as u16).min(inner.width.saturating_sub(1));
        let y = inner.y + (row - scroll) as u16;
        frame.set_cursor_position((x, y));
    }
}

fn status_line(view: &ScreenView<'_>) -> Paragraph<'static> {
    let bar = Style::default().add_modifier(Modifier::REVERSED);
    let mut spans = vec![Span::styled(format!(" [{}] ", view.mode.label()), bar)];
    match &view.status {
        Some(status) => {
            spans.push(Span::styled(
                format!(" {} ", status.name),
                Style::default().add_modifier(Modifier::BOLD),
            ));
            if !status.topic.is_empty() {
                spans.push(Span::raw(format!("| {} ", status.topic)));
            }
            if status.offset > 0 {
                spans.push(Span::styled(
                    format!("| scrolled {} ", status.offset),
                    Style::default().fg(Color::Yellow),
                ));
            }
            if status.exhausted {
                spans.push(Span::styled(
                    "| start of history ",
                    Style::default().fg(Color::DarkGray),
                ));
            }
        }
        None => spans.push(Span::raw(" no room ")),
    }
    if let Some(notice) = &view.notice {
        spans.push(Span::styled(
            format!("| {notice}"),
            Style::default().fg(Color::Yellow),
        ));
    }
    Paragraph::new(Line::from(spans))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomId;
    use ratatui::Terminal;
    use ratatui::backend::{Backend, TestBackend};
    use ratatui::layout::Position;

    fn row_text(terminal: &Terminal<TestBackend>, y: u16) -> String {
        let buffer = terminal.backend().buffer();
        let width = buffer.area.width;
        (0..width)
            .map(|x| buffer.content[usize::from(y * width + x)].symbol())
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    #[test_timeout::timeout]
    fn layout_reserves_status_and_input_rows() {
        let areas = layout(Rect::new(0, 0, 40, 12), 2);
        assert_eq!(areas.status, Rect::new(0, 0, 40, 1));
        assert_eq!(areas.history, Rect::new(0, 1, 40, 8));
        assert_eq!(areas.input, Rect::new(0, 9, 40, 3));
    }

    #[test_timeout::timeout]
    fn draws_status_history_and_composer() {
        let mut terminal = Terminal::new(TestBackend::new(60, 8)).unwrap();
        let paint = Paint {
            lines: vec![Line::from("12:00:00 - Ann: hi")],
            top_space: 3,
        };
        let mut composer = Composer::new(60);
        for ch in "typing".chars() {
            composer.insert(ch);
        }
        let view = ScreenView {
            status: Some(RoomStatus {
                room_id: RoomId::from("!r"),
                name: "Lobby".into(),
                topic: "say hi".into(),
                offset: 0,
                loaded: 1,
                exhausted: true,
            }),
            notice: None,
            mode: Mode::Compose,
            paint: &paint,
            composer: &composer,
            input_height: 1,
        };
        terminal.draw(|frame| draw(frame, &view)).unwrap();

        assert_eq!(
            row_text(&terminal, 0),
            " [COMPOSE]  Lobby | say hi | start of history"
        );
        // history occupies rows 1..=5 and is bottom-aligned
        assert_eq!(row_text(&terminal, 4), "");
        assert_eq!(row_text(&terminal, 5), "12:00:00 - Ann: hi");
        assert_eq!(row_text(&terminal, 7), "typing");
        let cursor = terminal.backend_mut().get_cursor_position().unwrap();
        assert_eq!(cursor, Position::new(6, 7));
    }
}
