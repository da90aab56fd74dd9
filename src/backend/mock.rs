use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::daemon::{CallbackId, EdgeKind, EdgeSink, PinDaemon, PinMode, PullMode, StatusCode};

const MOCK_MAX_GPIO: u32 = 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonOp {
    SetMode,
    SetPull,
    Register,
    Cancel,
}

#[derive(Default)]
struct CallCounters {
    set_mode: AtomicUsize,
    set_pull: AtomicUsize,
    register: AtomicUsize,
    cancel: AtomicUsize,
}

impl CallCounters {
    fn counter(&self, op: DaemonOp) -> &AtomicUsize {
        match op {
            DaemonOp::SetMode => &self.set_mode,
            DaemonOp::SetPull => &self.set_pull,
            DaemonOp::Register => &self.register,
            DaemonOp::Cancel => &self.cancel,
        }
    }
}

#[derive(Clone, Default)]
struct MockPinState {
    mode: Option<PinMode>,
    pull: Option<PullMode>,
    level: u8,
}

struct MockCallback {
    pin: u32,
    sink: Arc<dyn EdgeSink>,
}

/// In-process stand-in for the pin-control daemon.
///
/// Notifications are delivered synchronously on the thread that calls [`MockDaemon::deliver`]
/// or [`MockDaemon::drive`], which plays the part of the daemon's delivery thread.
pub struct MockDaemon {
    pins: Mutex<FxHashMap<u32, MockPinState>>, // keyed by pin number
    callbacks: Mutex<FxHashMap<CallbackId, MockCallback>>,
    failures: Mutex<FxHashMap<DaemonOp, StatusCode>>,
    late_cancel_failure: Mutex<Option<StatusCode>>,
    calls: CallCounters,
    next_callback: AtomicU32,
    started: Instant,
}

impl Default for MockDaemon {
    fn default() -> Self {
        Self {
            pins: Mutex::new(FxHashMap::default()),
            callbacks: Mutex::new(FxHashMap::default()),
            failures: Mutex::new(FxHashMap::default()),
            late_cancel_failure: Mutex::new(None),
            calls: CallCounters::default(),
            next_callback: AtomicU32::new(0),
            started: Instant::now(),
        }
    }
}

impl MockDaemon {
    /// Makes the next `op` call fail with `code`.
    pub fn fail_next(&self, op: DaemonOp, code: StatusCode) {
        self.failures.lock().insert(op, code);
    }

    /// Makes the next cancel drop the callback and still report `code`, like a daemon that
    /// fails while tearing the line down.
    pub fn fail_next_cancel_after_forget(&self, code: StatusCode) {
        *self.late_cancel_failure.lock() = Some(code);
    }

    pub fn calls(&self, op: DaemonOp) -> usize {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    pub fn mode(&self, pin: u32) -> Option<PinMode> {
        self.pins.lock().get(&pin).and_then(|p| p.mode)
    }

    pub fn pull(&self, pin: u32) -> Option<PullMode> {
        self.pins.lock().get(&pin).and_then(|p| p.pull)
    }

    /// Number of live callback registrations on `pin`.
    pub fn registrations(&self, pin: u32) -> usize {
        self.callbacks
            .lock()
            .values()
            .filter(|cb| cb.pin == pin)
            .count()
    }

    /// Sends a raw notification for `pin` to every callback registered on it.
    pub fn deliver(&self, pin: u32, level: u32, tick: u32) {
        // sinks run without the table locked so they may call back into the daemon
        let sinks: Vec<Arc<dyn EdgeSink>> = self
            .callbacks
            .lock()
            .values()
            .filter(|cb| cb.pin == pin)
            .map(|cb| cb.sink.clone())
            .collect();
        for sink in sinks {
            sink.on_edge(pin, level, tick);
        }
    }

    /// Drives an input pin to `high`, notifying callbacks when the level actually changes.
    pub fn drive(&self, pin: u32, high: bool) -> Result<(), StatusCode> {
        let level = u8::from(high);
        let changed = {
            let mut pins = self.pins.lock();
            let state = pins.get_mut(&pin).ok_or(StatusCode::BAD_GPIO)?;
            if state.mode != Some(PinMode::Input) {
                return Err(StatusCode::BAD_MODE);
            }
            let changed = state.level != level;
            state.level = level;
            changed
        };

        if changed {
            self.deliver(pin, u32::from(level), self.tick());
        }
        Ok(())
    }

    /// Sends a watchdog-expired notification for `pin`.
    pub fn watchdog(&self, pin: u32) {
        self.deliver(pin, 2, self.tick());
    }

    fn tick(&self) -> u32 {
        // the daemon's microsecond clock wraps at 2^32
        self.started.elapsed().as_micros() as u32
    }

    fn begin(&self, op: DaemonOp, pin: u32) -> Result<(), StatusCode> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.failures.lock().remove(&op) {
            return Err(code);
        }
        if pin > MOCK_MAX_GPIO {
            return Err(StatusCode::BAD_GPIO);
        }
        Ok(())
    }
}

impl PinDaemon for MockDaemon {
    fn set_mode(&self, pin: u32, mode: PinMode) -> Result<(), StatusCode> {
        self.begin(DaemonOp::SetMode, pin)?;
        self.pins.lock().entry(pin).or_default().mode = Some(mode);
        Ok(())
    }

    fn set_pull_up_down(&self, pin: u32, pull: PullMode) -> Result<(), StatusCode> {
        self.begin(DaemonOp::SetPull, pin)?;
        let mut pins = self.pins.lock();
        let state = pins.entry(pin).or_default();
        state.pull = Some(pull);
        // a biased input that nothing drives settles at the bias level
        match pull {
            PullMode::Up => state.level = 1,
            PullMode::Down => state.level = 0,
            PullMode::None => {}
        }
        Ok(())
    }

    fn register_edge_callback(
        &self,
        pin: u32,
        _edge: EdgeKind,
        sink: Arc<dyn EdgeSink>,
    ) -> Result<CallbackId, StatusCode> {
        self.begin(DaemonOp::Register, pin)?;
        let id = CallbackId(self.next_callback.fetch_add(1, Ordering::SeqCst));
        self.callbacks.lock().insert(id, MockCallback { pin, sink });
        Ok(id)
    }

    fn cancel_callback(&self, pin: u32, id: CallbackId) -> Result<(), StatusCode> {
        self.begin(DaemonOp::Cancel, pin)?;
        let mut callbacks = self.callbacks.lock();
        match callbacks.get(&id) {
            Some(cb) if cb.pin == pin => {
                callbacks.remove(&id);
                match self.late_cancel_failure.lock().take() {
                    Some(code) => Err(code),
                    None => Ok(()),
                }
            }
            _ => Err(StatusCode::CALLBACK_NOT_FOUND),
        }
    }
}
