//! Device Link contract.
//!
//! The engine talks to a lock device exclusively through this trait. Whatever
//! transport sits behind it (a radio link, a simulator) is irrelevant to the
//! engine: commands are enqueued synchronously and answered asynchronously by
//! [`LinkEvent`]s on a broadcast channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut events = link.subscribe();
//! link.send_command(CommandKind::Unlock)?;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         LinkEvent::Response(r) if r.kind == CommandKind::Unlock => break,
//!         LinkEvent::Disconnected => break,
//!         _ => {}
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::command::CommandKind;
use crate::error::LinkError;

/// Response envelope emitted by the device for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Which command this answers
    pub kind: CommandKind,
    /// Whether the device executed the command
    pub success: bool,
    /// Device-supplied failure reason
    pub error: Option<String>,
    /// When the device produced the response
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    /// Successful response stamped now.
    pub fn ok(kind: CommandKind) -> Self {
        Self {
            kind,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed response stamped now.
    pub fn failed(kind: CommandKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Asynchronous events published by a device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A command was answered
    Response(CommandResponse),
    /// The connection to the device was lost
    Disconnected,
}

/// Message-based link to a lock device.
pub trait DeviceLink: Send + Sync {
    /// Whether the link currently has a connection to the device.
    fn is_connected(&self) -> bool;

    /// Enqueue a command.
    ///
    /// Returns immediately; the answer arrives later as a
    /// [`LinkEvent::Response`]. Fails at once when the link is not connected.
    fn send_command(&self, kind: CommandKind) -> Result<(), LinkError>;

    /// Subscribe to response and disconnect events.
    ///
    /// Only events published after the call are delivered, so callers must
    /// subscribe before sending the command they want to correlate.
    fn subscribe(&self) -> broadcast::Receiver<LinkEvent>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "device_link"
    }
}
