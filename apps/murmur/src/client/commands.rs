//! Slash commands typed into the composer.

use crate::room::RoomId;

pub struct CommandSpec {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub help: &'static str,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "join",
        aliases: &["move"],
        help: "Usage: /join #room:homeserver.tld\nJoin or move to another room.\nAliases: /move",
    },
    CommandSpec {
        name: "leave",
        aliases: &[],
        help: "Usage: /leave [#room:homeserver.tld]\nLeave the given room, or the current one.",
    },
    CommandSpec {
        name: "emote",
        aliases: &["me", "em"],
        help: "Usage: /emote something\nSend an emote message.\nAliases: /me, /em",
    },
    CommandSpec {
        name: "whoami",
        aliases: &[],
        help: "Usage: /whoami\nPrint the logged in user.",
    },
    CommandSpec {
        name: "help",
        aliases: &["h", "?"],
        help: "Usage: /help [command]\nPrint help about the given command.\nAliases: /h, /?",
    },
    CommandSpec {
        name: "commands",
        aliases: &[],
        help: "Usage: /commands\nList available commands.\nFor more info on each command, try /help",
    },
    CommandSpec {
        name: "quit",
        aliases: &["exit"],
        help: "Usage: /quit\nLeave the client.\nAliases: /exit",
    },
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    let name = name.to_lowercase();
    COMMANDS
        .iter()
        .find(|spec| spec.name == name || spec.aliases.contains(&name.as_str()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Join(RoomId),
    Leave(Option<RoomId>),
    Emote(String),
    WhoAmI,
    Help(Option<String>),
    Commands,
    Quit,
}

impl Command {
    /// Canonical name, used to label command output.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Join(_) => "join",
            Command::Leave(_) => "leave",
            Command::Emote(_) => "emote",
            Command::WhoAmI => "whoami",
            Command::Help(_) => "help",
            Command::Commands => "commands",
            Command::Quit => "quit",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Message(String),
    Command(Command),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command \"{0}\", try /commands")]
    Unknown(String),
    #[error("{message}")]
    Usage {
        command: &'static str,
        message: &'static str,
    },
}

impl CommandError {
    /// Label for the error line.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Unknown(name) => name,
            CommandError::Usage { command, .. } => command,
        }
    }
}

/// Splits composer text into a plain message or a command. A leading `//`
/// sends the rest as a message starting with `/`.
pub fn parse(text: &str) -> Result<Submission, CommandError> {
    let Some(rest) = text.strip_prefix('/') else {
        return Ok(Submission::Message(text.to_string()));
    };
    if rest.starts_with('/') {
        return Ok(Submission::Message(rest.to_string()));
    }
    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();
    let spec = lookup(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;
    let usage = |message: &'static str| CommandError::Usage {
        command: spec.name,
        message,
    };
    let command = match spec.name {
        "join" => match args.as_slice() {
            [room] => Command::Join(RoomId::from(*room)),
            _ => return Err(usage("Join requires exactly one argument (destination room).")),
        },
        "leave" => match args.as_slice() {
            [] => Command::Leave(None),
            [room] => Command::Leave(Some(RoomId::from(*room))),
            _ => return Err(usage("Leave takes at most one argument (the room to leave).")),
        },
        "emote" => {
            if args.is_empty() {
                return Err(usage("You need to emote something!"));
            }
            Command::Emote(args.join(" "))
        }
        "whoami" => {
            if !args.is_empty() {
                return Err(usage("Whoami requires zero arguments."));
            }
            Command::WhoAmI
        }
        "help" => match args.as_slice() {
            [] => Command::Help(None),
            [topic] => Command::Help(Some(topic.to_lowercase())),
            _ => {
                return Err(usage(
                    "Help requires no more than one argument (hint: try /help help).",
                ));
            }
        },
        "commands" => {
            if !args.is_empty() {
                return Err(usage(
                    "Commands requires zero arguments (hint: try /help [command]).",
                ));
            }
            Command::Commands
        }
        "quit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Submission::Command(command))
}

/// Help text for `topic` (or for /help itself).
pub fn help_for(topic: Option<&str>) -> Result<&'static str, CommandError> {
    let topic = topic.unwrap_or("help");
    lookup(topic)
        .map(|spec| spec.help)
        .ok_or_else(|| CommandError::Unknown(topic.to_string()))
}

pub fn command_list() -> String {
    COMMANDS
        .iter()
        .map(|spec| format!("/{}", spec.name))
        .collect::<Vec<_>>()
        .join(", ")
}
