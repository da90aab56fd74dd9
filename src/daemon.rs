//! The seam between this crate and the pin-control daemon.
//!
//! Everything the core needs from the daemon client is expressed by [`PinDaemon`]. The daemon
//! delivers notifications for every registered pin through one [`EdgeSink`] per registration,
//! on its own delivery thread.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Raw status reported by the daemon for a rejected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const INIT_FAILED: StatusCode = StatusCode(-1);
    pub const BAD_USER_GPIO: StatusCode = StatusCode(-2);
    pub const BAD_GPIO: StatusCode = StatusCode(-3);
    pub const BAD_MODE: StatusCode = StatusCode(-4);
    pub const BAD_LEVEL: StatusCode = StatusCode(-5);
    pub const BAD_PUD: StatusCode = StatusCode(-6);
    pub const NOT_PERMITTED: StatusCode = StatusCode(-41);
    pub const BAD_SEND: StatusCode = StatusCode(-2000);
    pub const BAD_RECV: StatusCode = StatusCode(-2001);
    pub const BAD_CONNECT: StatusCode = StatusCode(-2003);
    pub const DUPLICATE_CALLBACK: StatusCode = StatusCode(-2006);
    pub const BAD_CALLBACK: StatusCode = StatusCode(-2008);
    pub const CALLBACK_NOT_FOUND: StatusCode = StatusCode(-2010);
    pub const UNCONNECTED_PI: StatusCode = StatusCode(-2011);
    /// Local line request failed; not a daemon code.
    pub const LINE_REQUEST_FAILED: StatusCode = StatusCode(-3000);

    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            StatusCode::INIT_FAILED => "PI_INIT_FAILED",
            StatusCode::BAD_USER_GPIO => "PI_BAD_USER_GPIO",
            StatusCode::BAD_GPIO => "PI_BAD_GPIO",
            StatusCode::BAD_MODE => "PI_BAD_MODE",
            StatusCode::BAD_LEVEL => "PI_BAD_LEVEL",
            StatusCode::BAD_PUD => "PI_BAD_PUD",
            StatusCode::NOT_PERMITTED => "PI_NOT_PERMITTED",
            StatusCode::BAD_SEND => "pigif_bad_send",
            StatusCode::BAD_RECV => "pigif_bad_recv",
            StatusCode::BAD_CONNECT => "pigif_bad_connect",
            StatusCode::DUPLICATE_CALLBACK => "pigif_duplicate_callback",
            StatusCode::BAD_CALLBACK => "pigif_bad_callback",
            StatusCode::CALLBACK_NOT_FOUND => "pigif_callback_not_found",
            StatusCode::UNCONNECTED_PI => "pigif_unconnected_pi",
            StatusCode::LINE_REQUEST_FAILED => "LINE_REQUEST_FAILED",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "unknown status ({})", self.0),
        }
    }
}

/// Identifier the daemon hands back for one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CallbackId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinMode {
    Input,
    Output,
}

/// Internal resistor bias of an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullMode {
    Up,
    Down,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Rising,
    Falling,
    Either,
}

/// Receiver of raw daemon notifications.
///
/// `level` is 0 or 1 for a transition and 2 when the daemon's watchdog expired without one.
/// `tick` is the daemon's microsecond clock and wraps at 2^32.
pub trait EdgeSink: Send + Sync {
    fn on_edge(&self, pin: u32, level: u32, tick: u32);
}

pub trait PinDaemon: Send + Sync {
    fn set_mode(&self, pin: u32, mode: PinMode) -> Result<(), StatusCode>;

    fn set_pull_up_down(&self, pin: u32, pull: PullMode) -> Result<(), StatusCode>;

    fn register_edge_callback(
        &self,
        pin: u32,
        edge: EdgeKind,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<CallbackId, StatusCode>;

    fn cancel_callback(&self, pin: u32, id: CallbackId) -> Result<(), StatusCode>;
}
