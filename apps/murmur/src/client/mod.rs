pub mod commands;
pub mod display;
pub mod input;
pub mod screen;
pub mod session;
pub mod terminal;
pub mod viewport;

pub use display::{Backfill, BackfillPage, DisplayController, DisplaySettings, Ingest};
pub use input::{Composer, InputAction, InputController, Mode};
pub use session::{ChatSession, Flow, SessionSettings};
pub use terminal::ChatClient;

use crate::store::CoreError;
use crate::transport::TransportError;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("terminal error: {0}")]
    Terminal(#[from] std::io::Error),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("not in a room")]
    NoRoom,
}
