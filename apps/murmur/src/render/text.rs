use ratatui::text::{Line, Span};
use time::OffsetDateTime;
use unicode_width::UnicodeWidthChar;

use super::{Fragment, RenderContext, RenderError, Tone};

/// Wraps styled fragments into lines of at most `width` columns.
///
/// Breaks happen at character boundaries; `\n` forces a break. Trailing
/// newlines produce no extra line, and input without any text produces no
/// lines at all.
pub fn wrap(fragments: &[Fragment], width: u16) -> Vec<Line<'static>> {
    let width = usize::from(width.max(1));
    let mut lines = Vec::new();
    let mut builder = LineBuilder::default();

    for fragment in fragments {
        for ch in fragment.text.chars() {
            if ch == '\n' {
                lines.push(builder.finish());
                continue;
            }
            let cols = ch.width().unwrap_or(0);
            if builder.cols > 0 && builder.cols + cols > width {
                lines.push(builder.finish());
            }
            builder.push(ch, cols, fragment.tone);
        }
    }
    if !builder.is_empty() {
        lines.push(builder.finish());
    }
    lines
}

#[derive(Default)]
struct LineBuilder {
    spans: Vec<Span<'static>>,
    pending: String,
    tone: Option<Tone>,
    cols: usize,
}

impl LineBuilder {
    fn push(&mut self, ch: char, cols: usize, tone: Tone) {
        if self.tone != Some(tone) {
            self.flush_span();
            self.tone = Some(tone);
        }
        self.pending.push(ch);
        self.cols += cols;
    }

    fn flush_span(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(tone) = self.tone {
            let text = std::mem::take(&mut self.pending);
            self.spans.push(Span::styled(text, tone.style()));
        }
    }

    fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.pending.is_empty()
    }

    fn finish(&mut self) -> Line<'static> {
        self.flush_span();
        self.tone = None;
        self.cols = 0;
        Line::from(std::mem::take(&mut self.spans))
    }
}

/// Formats an origin timestamp as `HH:MM:SS` when it falls on the context's
/// local date, `YYYY-MM-DD` otherwise.
pub fn format_timestamp(millis: i64, ctx: &RenderContext) -> Result<String, RenderError> {
    let nanos = i128::from(millis) * 1_000_000;
    let at = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|_| RenderError::Timestamp(millis))?
        .to_offset(ctx.offset);
    if at.date() == ctx.today {
        Ok(format!(
            "{:02}:{:02}:{:02}",
            at.hour(),
            at.minute(),
            at.second()
        ))
    } else {
        let date = at.date();
        Ok(format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        ))
    }
}

/// Plain text of a line, for tests and diagnostics.
pub fn line_text(line: &Line<'_>) -> String {
    line.spans.iter().map(|span| span.content.as_ref()).collect()
}
