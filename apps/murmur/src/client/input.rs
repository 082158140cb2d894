use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use unicode_width::UnicodeWidthChar;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Keystrokes edit the composer.
    #[default]
    Compose,
    /// Keystrokes scroll the history.
    Navigate,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Compose => "COMPOSE",
            Mode::Navigate => "NAVIGATE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputAction {
    None,
    /// Only the input area or mode changed.
    Redraw,
    /// Move the viewport; positive is older.
    Scroll(isize),
    JumpOldest,
    JumpNewest,
    Submit(String),
    Quit,
}

/// Single-buffer text editor with soft wrapping at `width` columns.
#[derive(Clone, Debug)]
pub struct Composer {
    chars: Vec<char>,
    cursor: usize,
    width: u16,
}

impl Default for Composer {
    fn default() -> Self {
        Self::new(80)
    }
}

impl Composer {
    pub fn new(width: u16) -> Self {
        Self {
            chars: Vec::new(),
            cursor: 0,
            width: width.max(1),
        }
    }

    pub fn set_width(&mut self, width: u16) {
        self.width = width.max(1);
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn insert(&mut self, ch: char) {
        self.chars.insert(self.cursor, ch);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            self.chars.remove(self.cursor);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.chars.len() {
            self.chars.remove(self.cursor);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.chars.len());
    }

    pub fn end(&mut self) {
        self.cursor = self.chars.len();
    }

    /// Empties the composer and returns what it held.
    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.chars).into_iter().collect()
    }

    /// Wrapped rows of text, for drawing.
    pub fn rows(&self) -> Vec<String> {
        let layout = self.layout();
        let mut rows = vec![String::new(); self.line_count()];
        for (ch, (row, _)) in self.chars.iter().zip(&layout) {
            rows[*row].push(*ch);
        }
        rows
    }

    /// (row, column) of the cursor within the wrapped text.
    pub fn cursor_position(&self) -> (usize, usize) {
        self.layout()[self.cursor]
    }

    pub fn line_count(&self) -> usize {
        self.layout().last().map_or(1, |(row, _)| row + 1)
    }

    pub fn on_first_line(&self) -> bool {
        self.cursor_position().0 == 0
    }

    pub fn on_last_line(&self) -> bool {
        self.cursor_position().0 + 1 >= self.line_count()
    }

    pub fn up(&mut self) {
        let (row, col) = self.cursor_position();
        if row > 0 {
            self.cursor = self.index_near(row - 1, col);
        }
    }

    pub fn down(&mut self) {
        let (row, col) = self.cursor_position();
        if row + 1 < self.line_count() {
            self.cursor = self.index_near(row + 1, col);
        }
    }

    /// Positions of every cursor slot, including the one past the last char.
    fn layout(&self) -> Vec<(usize, usize)> {
        let width = usize::from(self.width);
        let mut positions = Vec::with_capacity(self.chars.len() + 1);
        let (mut row, mut col) = (0, 0);
        for ch in &self.chars {
            let cols = ch.width().unwrap_or(0);
            if col > 0 && col + cols > width {
                row += 1;
                col = 0;
            }
            positions.push((row, col));
            col += cols;
        }
        if col >= width {
            positions.push((row + 1, 0));
        } else {
            positions.push((row, col));
        }
        positions
    }

    fn index_near(&self, row: usize, col: usize) -> usize {
        let layout = self.layout();
        let mut best = None;
        for (index, (r, c)) in layout.iter().enumerate() {
            if *r == row && (*c <= col || best.is_none()) {
                best = Some(index);
            }
        }
        best.unwrap_or(self.cursor)
    }
}

/// Two-mode keystroke router.
#[derive(Debug)]
pub struct InputController {
    mode: Mode,
    scroll_page: usize,
}

impl InputController {
    pub fn new(scroll_page: usize) -> Self {
        Self {
            mode: Mode::Compose,
            scroll_page: scroll_page.max(1),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn handle_key(&mut self, key: KeyEvent, composer: &mut Composer) -> InputAction {
        if key.kind == KeyEventKind::Release {
            return InputAction::None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL)
            && matches!(key.code, KeyCode::Char('c') | KeyCode::Char('q'))
        {
            return InputAction::Quit;
        }
        let page = self.scroll_page as isize;
        match key.code {
            KeyCode::PageUp => return InputAction::Scroll(page),
            KeyCode::PageDown => return InputAction::Scroll(-page),
            _ => {}
        }
        match self.mode {
            Mode::Compose => self.compose_key(key, composer),
            Mode::Navigate => self.navigate_key(key),
        }
    }

    fn compose_key(&mut self, key: KeyEvent, composer: &mut Composer) -> InputAction {
        match key.code {
            KeyCode::Esc | KeyCode::Home => {
                self.mode = Mode::Navigate;
                InputAction::Redraw
            }
            KeyCode::Up if composer.on_first_line() => InputAction::Scroll(1),
            KeyCode::Down if composer.on_last_line() => InputAction::Scroll(-1),
            KeyCode::Up => {
                composer.up();
                InputAction::Redraw
            }
            KeyCode::Down => {
                composer.down();
                InputAction::Redraw
            }
            KeyCode::Enter => {
                let text = composer.take();
                if text.trim().is_empty() {
                    InputAction::Redraw
                } else {
                    InputAction::Submit(text)
                }
            }
            KeyCode::Backspace => {
                composer.backspace();
                InputAction::Redraw
            }
            KeyCode::Delete => {
                composer.delete();
                InputAction::Redraw
            }
            KeyCode::Left => {
                composer.left();
                InputAction::Redraw
            }
            KeyCode::Right => {
                composer.right();
                InputAction::Redraw
            }
            KeyCode::End => {
                composer.end();
                InputAction::Redraw
            }
            KeyCode::Char(ch) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                composer.insert(ch);
                InputAction::Redraw
            }
            _ => InputAction::None,
        }
    }

    fn navigate_key(&mut self, key: KeyEvent) -> InputAction {
        match key.code {
            KeyCode::Char('i') | KeyCode::Insert => {
                self.mode = Mode::Compose;
                InputAction::Redraw
            }
            KeyCode::Up | KeyCode::Char('k') => InputAction::Scroll(1),
            KeyCode::Down | KeyCode::Char('j') => InputAction::Scroll(-1),
            KeyCode::Char('g') | KeyCode::Home => InputAction::JumpOldest,
            KeyCode::Char('G') | KeyCode::End => InputAction::JumpNewest,
            _ => InputAction::None,
        }
    }
}
