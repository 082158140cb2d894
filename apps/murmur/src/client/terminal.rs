use crossterm::{
    event::{self, Event as TermEvent, KeyEvent},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
    layout::Rect,
};
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

use super::ClientError;
use super::input::{Composer, InputAction, InputController};
use super::screen::{self, ScreenView};
use super::session::{ChatSession, Flow};
use crate::room::RoomId;
use crate::telemetry::PerfGuard;

const INPUT_POLL: Duration = Duration::from_millis(25);

/// The interactive chat loop: terminal input, inbound events, repaint.
pub struct ChatClient {
    session: ChatSession,
    input: InputController,
    composer: Composer,
    input_height: u16,
    tui: Option<Terminal<CrosstermBackend<io::Stdout>>>,
    history_size: (u16, u16),
    dirty: bool,
}

impl ChatClient {
    pub fn new(session: ChatSession, scroll_page: usize, input_height: u16) -> Self {
        Self {
            session,
            input: InputController::new(scroll_page),
            composer: Composer::default(),
            input_height: input_height.max(1),
            tui: None,
            history_size: (0, 0),
            dirty: true,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn run(mut self, initial_room: Option<RoomId>) -> Result<(), ClientError> {
        self.setup_tui()?;
        debug!(target = "client::loop", "client loop started");
        let run_result = (|| -> Result<(), ClientError> {
            if let Some(room) = initial_room {
                // Ensure the viewport size is known before the first backfill.
                self.sync_size()?;
                if let Flow::Quit = self.session.submit(&format!("/join {room}"))? {
                    return Ok(());
                }
            }
            loop {
                if self.pump_input()? == Flow::Quit {
                    return Ok(());
                }
                if self.session.pump()? > 0 {
                    self.dirty = true;
                }
                self.maybe_render()?;
            }
        })();
        let teardown_result = self.teardown_tui();
        debug!(target = "client::loop", "client loop finished");
        run_result.and(teardown_result)
    }

    /// Feeds one key to the input controller and acts on the result.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<Flow, ClientError> {
        let action = self.input.handle_key(key, &mut self.composer);
        trace!(target = "client::input", ?action, mode = ?self.input.mode(), "key");
        match action {
            InputAction::None => return Ok(Flow::Continue),
            InputAction::Redraw => {}
            InputAction::Scroll(delta) => self.session.scroll(delta)?,
            InputAction::JumpOldest => self.session.jump_to_oldest()?,
            InputAction::JumpNewest => self.session.jump_to_newest()?,
            InputAction::Submit(text) => {
                if self.session.submit(&text)? == Flow::Quit {
                    return Ok(Flow::Quit);
                }
            }
            InputAction::Quit => return Ok(Flow::Quit),
        }
        self.dirty = true;
        Ok(Flow::Continue)
    }

    /// Tells the session and composer about the current layout for `area`.
    pub fn apply_layout(&mut self, area: Rect) -> Result<(), ClientError> {
        let areas = screen::layout(area, self.input_height);
        self.composer.set_width(areas.input.width);
        let size = (areas.history.width, areas.history.height);
        if size != self.history_size {
            self.history_size = size;
            self.session.resize(size.0, size.1)?;
            self.dirty = true;
        }
        Ok(())
    }

    /// Draws one frame to any backend.
    pub fn draw<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), ClientError> {
        let size = terminal.size()?;
        self.apply_layout(Rect::new(0, 0, size.width, size.height))?;
        let _guard = PerfGuard::new("client_render");
        let display = self.session.display();
        let view = ScreenView {
            status: display.status(),
            notice: self.session.notice(),
            mode: self.input.mode(),
            paint: display.painted(),
            composer: &self.composer,
            input_height: self.input_height,
        };
        terminal.draw(|frame| screen::draw(frame, &view))?;
        self.dirty = false;
        Ok(())
    }

    fn sync_size(&mut self) -> Result<(), ClientError> {
        if let Some(tui) = &self.tui {
            let size = tui.size()?;
            self.apply_layout(Rect::new(0, 0, size.width, size.height))?;
        }
        Ok(())
    }

    fn pump_input(&mut self) -> Result<Flow, ClientError> {
        if !event::poll(INPUT_POLL)? {
            return Ok(Flow::Continue);
        }
        loop {
            match event::read()? {
                TermEvent::Key(key) => {
                    if self.handle_key(key)? == Flow::Quit {
                        return Ok(Flow::Quit);
                    }
                }
                TermEvent::Resize(cols, rows) => {
                    self.apply_layout(Rect::new(0, 0, cols, rows))?;
                }
                TermEvent::Paste(text) => {
                    for ch in text.chars().filter(|ch| !ch.is_control()) {
                        self.composer.insert(ch);
                    }
                    self.dirty = true;
                }
                _ => {}
            }
            if !event::poll(Duration::from_millis(0))? {
                return Ok(Flow::Continue);
            }
        }
    }

    fn maybe_render(&mut self) -> Result<(), ClientError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(mut tui) = self.tui.take() {
            let result = self.draw(&mut tui);
            self.tui = Some(tui);
            result?;
        }
        Ok(())
    }

    fn setup_tui(&mut self) -> Result<(), ClientError> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        self.tui = Some(terminal);
        self.dirty = true;
        Ok(())
    }

    fn teardown_tui(&mut self) -> Result<(), ClientError> {
        if let Some(mut terminal) = self.tui.take() {
            terminal.show_cursor().ok();
            terminal.clear()?;
        }
        disable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, LeaveAlternateScreen)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionSettings;
    use crate::transport::replay::ReplayTransport;
    use crossterm::event::{KeyCode, KeyModifiers};
    use ratatui::backend::TestBackend;
    use std::sync::Arc;
    use time::UtcOffset;

    fn client() -> ChatClient {
        let transport = Arc::new(ReplayTransport::empty("@me:example.org").unwrap());
        let session = ChatSession::new(transport, SessionSettings::default(), UtcOffset::UTC);
        ChatClient::new(session, 10, 1)
    }

    fn type_line(client: &mut ChatClient, text: &str) -> Flow {
        for ch in text.chars() {
            client
                .handle_key(KeyEvent::new(KeyCode::Char(ch), KeyModifiers::NONE))
                .unwrap();
        }
        client
            .handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE))
            .unwrap()
    }

    #[test_timeout::timeout]
    fn quit_command_ends_the_loop() {
        let mut client = client();
        assert_eq!(type_line(&mut client, "/quit"), Flow::Quit);
    }

    #[test_timeout::timeout]
    fn layout_sizes_the_history_viewport() {
        let mut client = client();
        let mut terminal = Terminal::new(TestBackend::new(50, 12)).unwrap();
        client.draw(&mut terminal).unwrap();
        assert_eq!(client.history_size, (50, 9));
        assert_eq!(client.composer().cursor_position(), (0, 0));
    }

    #[test_timeout::timeout]
    fn joining_prints_history_and_command_output() {
        let mut client = client();
        let mut terminal = Terminal::new(TestBackend::new(60, 12)).unwrap();
        client.draw(&mut terminal).unwrap();
        assert_eq!(type_line(&mut client, "/join #new:example.org"), Flow::Continue);
        client.draw(&mut terminal).unwrap();

        let display = client.session().display();
        let lines: Vec<String> = display
            .painted()
            .lines
            .iter()
            .map(crate::render::text::line_text)
            .collect();
        assert_eq!(lines.len(), 3, "{lines:?}");
        assert!(lines[..2].iter().any(|line| line.ends_with("@me:example.org created the room.")));
        assert!(lines[..2].iter().any(|line| line.ends_with("@me:example.org joined the room.")));
        assert_eq!(lines[2], "join: Joined #new:example.org");
    }
}
