use std::sync::Arc;

use log::trace;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::daemon::{CallbackId, EdgeSink, PinMode, PullMode};
use crate::interrupt::{EdgeEvent, EdgeHandler, RawNotification, SubscriptionState};

/// Everything one connection knows about one pin.
pub(crate) struct PinSlot {
    pub mode: Option<PinMode>,
    pub pull: Option<PullMode>,
    pub state: SubscriptionState,
    pub callback_id: Option<CallbackId>,
    pub handler: Option<Arc<dyn EdgeHandler>>,
}

impl PinSlot {
    fn new() -> Self {
        Self {
            mode: None,
            pull: None,
            state: SubscriptionState::Unregistered,
            callback_id: None,
            handler: None,
        }
    }

    pub fn release(&mut self) {
        self.state = SubscriptionState::Unregistered;
        self.callback_id = None;
        self.handler = None;
    }

    fn delivers(&self) -> bool {
        matches!(
            self.state,
            SubscriptionState::Registering | SubscriptionState::Active
        )
    }
}

/// Per-connection table of pin slots, and the single entry point the daemon delivers into.
pub struct PinRegistry {
    slots: RwLock<FxHashMap<u32, Arc<Mutex<PinSlot>>>>, // keyed by pin number
}

impl PinRegistry {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(FxHashMap::default()),
        }
    }

    pub(crate) fn slot(&self, pin: u32) -> Arc<Mutex<PinSlot>> {
        let slots = self.slots.upgradable_read();
        if let Some(slot) = slots.get(&pin) {
            return slot.clone();
        }

        let mut slots = RwLockUpgradableReadGuard::upgrade(slots);
        slots
            .entry(pin)
            .or_insert_with(|| Arc::new(Mutex::new(PinSlot::new())))
            .clone()
    }

    fn existing(&self, pin: u32) -> Option<Arc<Mutex<PinSlot>>> {
        self.slots.read().get(&pin).cloned()
    }

    pub fn state(&self, pin: u32) -> SubscriptionState {
        self.existing(pin)
            .map(|slot| slot.lock().state)
            .unwrap_or(SubscriptionState::Unregistered)
    }

    pub fn pull(&self, pin: u32) -> Option<PullMode> {
        self.existing(pin).and_then(|slot| slot.lock().pull)
    }

    pub fn callback_id(&self, pin: u32) -> Option<CallbackId> {
        self.existing(pin).and_then(|slot| slot.lock().callback_id)
    }

    /// Forgets every registration and recorded pin state without touching the daemon.
    pub(crate) fn clear(&self) {
        let slots = self.slots.read();
        for slot in slots.values() {
            let mut slot = slot.lock();
            slot.release();
            slot.mode = None;
            slot.pull = None;
        }
    }

    fn handler_for(&self, pin: u32) -> Option<Arc<dyn EdgeHandler>> {
        let slot = self.existing(pin)?;
        let slot = slot.lock();
        if slot.delivers() {
            slot.handler.clone()
        } else {
            None
        }
    }
}

impl EdgeSink for PinRegistry {
    fn on_edge(&self, pin: u32, level: u32, tick: u32) {
        match RawNotification::from_raw(level, tick) {
            RawNotification::WatchdogExpired => {
                trace!("watchdog notification on pin {pin} discarded");
            }
            RawNotification::Edge { level, tick } => {
                // slot lock is released before the handler runs
                if let Some(handler) = self.handler_for(pin) {
                    handler.on_event(EdgeEvent::new(pin, level, tick));
                }
            }
        }
    }
}
