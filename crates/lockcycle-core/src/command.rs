//! Command kinds understood by a lock device.

use serde::{Deserialize, Serialize};

/// One command a cycle can issue.
///
/// The device answers each kind with a response event of the same kind; the
/// engine never looks past this envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Open the lock
    Unlock,
    /// Close the lock
    Lock,
}

impl CommandKind {
    /// Lowercase wire name of the command.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Unlock => "unlock",
            CommandKind::Lock => "lock",
        }
    }

    /// Default cycle template: open, then close.
    pub fn default_cycle() -> Vec<CommandKind> {
        vec![CommandKind::Unlock, CommandKind::Lock]
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unlock" => Ok(CommandKind::Unlock),
            "lock" => Ok(CommandKind::Lock),
            other => Err(format!("unknown command kind '{}'", other)),
        }
    }
}
