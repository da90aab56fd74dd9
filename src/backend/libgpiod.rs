use log::{debug, warn};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};
use parking_lot::{FairMutex, Mutex};
use rustc_hash::FxHashMap;

use crate::config::PinConfig;
use crate::daemon::{CallbackId, EdgeKind, EdgeSink, PinDaemon, PinMode, PullMode, StatusCode};
use crate::error::GpioError;

const LIBGPIOD_DAEMON_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_DAEMON_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

fn request_failed(context: &str, e: impl Display) -> StatusCode {
    warn!("{context}: {e}");
    StatusCode::LINE_REQUEST_FAILED
}

struct LineAddress {
    chip: String,
    offset: u32,
}

#[derive(Clone, Copy)]
struct LineState {
    mode: PinMode,
    pull: Option<PullMode>,
    edges: bool,
}

impl Default for LineState {
    fn default() -> Self {
        Self {
            mode: PinMode::Input,
            pull: None,
            edges: false,
        }
    }
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, StatusCode> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, StatusCode> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| request_failed(&format!("open chip {path}"), e))
    }

    fn request_lines(
        chip: &Chip,
        line_cfg: &line::Config,
    ) -> Result<request::Request, StatusCode> {
        let mut req_cfg =
            request::Config::new().map_err(|e| request_failed("request config", e))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| request_failed("request consumer", e))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| request_failed("request lines", e))
    }
}

/// Polls one line request for edges and forwards them to the registered sink, the way the
/// daemon's delivery thread would.
struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        pin: u32,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<Self, StatusCode> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_DAEMON_EVENT_BUFFER_CAPACITY)
            .map_err(|e| request_failed("event buffer", e))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let hdl = gpiod_handle.lock();
                let req = &hdl.request;

                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_DAEMON_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("wait edge events error for pin {pin}: {e}");
                            drop(hdl);
                            yield_now();
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let events = match req.read_edge_events(&mut buffer) {
                    Ok(evts) => evts,
                    Err(e) => {
                        warn!("read edge events error for pin {pin}: {e}");
                        drop(hdl);
                        yield_now();
                        continue;
                    }
                };

                let mut pending = Vec::new();
                for evt in events {
                    let evt = match evt {
                        Ok(e) => e,
                        Err(_) => continue,
                    };
                    let level = match evt.event_type() {
                        Ok(line::EdgeKind::Rising) => 1,
                        Ok(line::EdgeKind::Falling) => 0,
                        Err(_) => continue,
                    };
                    // microsecond tick, wrapping at 2^32 like the daemon's clock
                    pending.push((level, evt.timestamp().as_micros() as u32));
                }
                drop(hdl);

                for (level, tick) in pending {
                    sink.on_edge(pin, level, tick);
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct LineHandle {
    offset: u32,
    state: LineState,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
    callback: Option<CallbackId>,
    listener: Option<EdgeListener>, // drop in reverse order
}

impl LineHandle {
    fn reconfigure(&mut self, state: LineState) -> Result<(), StatusCode> {
        let line_cfg = LibgpiodDaemon::make_line_config(self.offset, &state)?;
        self.gpiod_handle
            .lock()
            .request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| request_failed("reconfigure lines", e))?;
        self.state = state;
        Ok(())
    }
}

/// Serves the daemon interface from the kernel's GPIO character devices.
pub struct LibgpiodDaemon {
    addresses: FxHashMap<u32, LineAddress>, // keyed by pin number
    lines: Mutex<FxHashMap<u32, LineHandle>>,
    next_callback: AtomicU32,
}

impl LibgpiodDaemon {
    pub fn new(pins: &FxHashMap<u32, PinConfig>) -> Result<Self, GpioError> {
        let mut addresses = FxHashMap::default();
        for (pin, cfg) in pins {
            if cfg.chip.is_empty() {
                return Err(GpioError::Config(format!("pin {pin} has no chip path")));
            }
            addresses.insert(
                *pin,
                LineAddress {
                    chip: cfg.chip.clone(),
                    offset: cfg.line,
                },
            );
        }

        Ok(Self {
            addresses,
            lines: Mutex::new(FxHashMap::default()),
            next_callback: AtomicU32::new(0),
        })
    }

    fn make_line_settings(state: &LineState) -> Result<line::Settings, StatusCode> {
        let mut ls = line::Settings::new().map_err(|e| request_failed("libgpiod settings", e))?;

        match state.mode {
            PinMode::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| request_failed("set direction", e))?;
            }
            PinMode::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| request_failed("set direction", e))?;
            }
        }

        let bias = match state.pull {
            Some(PullMode::Up) => Some(line::Bias::PullUp),
            Some(PullMode::Down) => Some(line::Bias::PullDown),
            Some(PullMode::None) | None => None,
        };
        ls.set_bias(bias)
            .map_err(|e| request_failed("set bias", e))?;

        if state.edges && state.mode == PinMode::Input {
            ls.set_edge_detection(Some(line::Edge::Both))
                .map_err(|e| request_failed("set edge detection", e))?;
            ls.set_event_clock(EventClock::Monotonic)
                .map_err(|e| request_failed("set event clock", e))?;
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, state: &LineState) -> Result<line::Config, StatusCode> {
        let settings = Self::make_line_settings(state)?;
        let mut cfg = line::Config::new().map_err(|e| request_failed("line config", e))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| request_failed("line config add settings", e))?;
        Ok(cfg)
    }

    /// Runs `f` on the pin's line request, requesting the line first if needed.
    fn with_line<T>(
        &self,
        pin: u32,
        f: impl FnOnce(&mut LineHandle) -> Result<T, StatusCode>,
    ) -> Result<T, StatusCode> {
        let address = self.addresses.get(&pin).ok_or(StatusCode::BAD_GPIO)?;
        let mut lines = self.lines.lock();

        if !lines.contains_key(&pin) {
            let state = LineState::default();
            let line_cfg = Self::make_line_config(address.offset, &state)?;
            let gpiod_handle = GpiodHandle::new(&address.chip, &line_cfg)?;
            lines.insert(
                pin,
                LineHandle {
                    offset: address.offset,
                    state,
                    gpiod_handle: Arc::new(FairMutex::new(gpiod_handle)),
                    callback: None,
                    listener: None,
                },
            );
            debug!("requested line {} on {} for pin {pin}", address.offset, address.chip);
        }

        match lines.get_mut(&pin) {
            Some(handle) => f(handle),
            None => Err(StatusCode::BAD_GPIO),
        }
    }
}

impl PinDaemon for LibgpiodDaemon {
    fn set_mode(&self, pin: u32, mode: PinMode) -> Result<(), StatusCode> {
        self.with_line(pin, |handle| {
            if mode == PinMode::Output && handle.listener.is_some() {
                return Err(StatusCode::BAD_MODE);
            }
            handle.reconfigure(LineState {
                mode,
                ..handle.state
            })
        })
    }

    fn set_pull_up_down(&self, pin: u32, pull: PullMode) -> Result<(), StatusCode> {
        self.with_line(pin, |handle| {
            handle.reconfigure(LineState {
                pull: Some(pull),
                ..handle.state
            })
        })
    }

    fn register_edge_callback(
        &self,
        pin: u32,
        edge: EdgeKind,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<CallbackId, StatusCode> {
        if edge != EdgeKind::Either {
            return Err(StatusCode::BAD_CALLBACK);
        }

        self.with_line(pin, |handle| {
            if handle.listener.is_some() {
                return Err(StatusCode::DUPLICATE_CALLBACK);
            }
            if handle.state.mode != PinMode::Input {
                return Err(StatusCode::BAD_MODE);
            }

            // dropping the listener on a failed reconfigure joins its thread
            let listener = EdgeListener::new(pin, handle.gpiod_handle.clone(), sink)?;
            handle.reconfigure(LineState {
                edges: true,
                ..handle.state
            })?;
            let id = CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed));
            handle.listener = Some(listener);
            handle.callback = Some(id);
            Ok(id)
        })
    }

    fn cancel_callback(&self, pin: u32, id: CallbackId) -> Result<(), StatusCode> {
        let listener = {
            let mut lines = self.lines.lock();
            let handle = lines
                .get_mut(&pin)
                .filter(|handle| handle.callback == Some(id))
                .ok_or(StatusCode::CALLBACK_NOT_FOUND)?;
            handle.callback = None;
            handle.listener.take()
        };
        // joined without the line table locked; the listener may be inside a sink that calls
        // back into this daemon
        drop(listener);

        // the callback is gone once its listener is joined; a line left with edge detection
        // on only costs unread kernel events
        let disarmed = self.with_line(pin, |handle| {
            handle.reconfigure(LineState {
                edges: false,
                ..handle.state
            })
        });
        if let Err(code) = disarmed {
            warn!("pin {pin} keeps edge detection after cancel: {code}");
        }
        Ok(())
    }
}
