//! Uniform command set and capability-gated option rendering.

use std::fmt;

use kibitz_types::{backend::Capabilities, variant::GameVariant};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Uci,
    IsReady,
    SetOption { name: String, value: String },
    NewGame,
    Position { fen: String, moves: Option<String> },
    Go { movetime_ms: u64 },
    Stop,
    Quit,
}

impl EngineCommand {
    pub fn set_option(name: &str, value: impl ToString) -> Self {
        EngineCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Uci => f.write_str("uci"),
            EngineCommand::IsReady => f.write_str("isready"),
            EngineCommand::SetOption { name, value } => {
                write!(f, "setoption name {name} value {value}")
            }
            EngineCommand::NewGame => f.write_str("ucinewgame"),
            EngineCommand::Position { fen, moves: None } => write!(f, "position fen {fen}"),
            EngineCommand::Position {
                fen,
                moves: Some(moves),
            } => write!(f, "position fen {fen} moves {moves}"),
            EngineCommand::Go { movetime_ms } => write!(f, "go movetime {movetime_ms}"),
            EngineCommand::Stop => f.write_str("stop"),
            EngineCommand::Quit => f.write_str("quit"),
        }
    }
}

/// Search options requested by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    #[serde(rename = "Hash")]
    pub hash_mb: usize,
    #[serde(rename = "Threads")]
    pub threads: usize,
    #[serde(rename = "MultiPV")]
    pub multipv: usize,
    #[serde(skip)]
    pub variant: GameVariant,
}

/// Renders the `setoption` commands the backend accepts. Options the
/// backend does not support are left out.
pub fn gate_options(options: &EngineOptions, capabilities: &Capabilities) -> Vec<EngineCommand> {
    let mut commands = Vec::with_capacity(3);
    if capabilities.hash_option {
        commands.push(EngineCommand::set_option("Hash", options.hash_mb));
    } else {
        debug!(hash_mb = options.hash_mb, "omitting unsupported Hash option");
    }
    if capabilities.threads_option {
        commands.push(EngineCommand::set_option("Threads", options.threads));
    } else {
        debug!(threads = options.threads, "omitting unsupported Threads option");
    }
    commands.push(EngineCommand::set_option("MultiPV", options.multipv));
    commands
}

/// `UCI_Variant` selection for backends that play several rule sets.
pub fn variant_option(variant: GameVariant, capabilities: &Capabilities) -> Option<EngineCommand> {
    if capabilities.variant_option {
        Some(EngineCommand::set_option("UCI_Variant", variant.id()))
    } else {
        if variant != GameVariant::Chess {
            debug!(%variant, "backend has no UCI_Variant option");
        }
        None
    }
}
