use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::{AppConfig, PinConfig};
use crate::connection::Connection;
use crate::daemon::{CallbackId, PinDaemon, PullMode};
use crate::error::GpioError;
use crate::interrupt::{EdgeEvent, EdgeHandler, Level, Subscription, SubscriptionState};

const TICK_MODULUS: u64 = 1 << 32;

/// Widens the daemon's wrapping 32-bit microsecond tick into a 64-bit timestamp.
///
/// Only valid for ticks of a single pin, where delivery order matches generation order.
#[derive(Debug, Default, Clone)]
pub struct TickExtender {
    last: Option<u32>,
    rollovers: u64,
}

impl TickExtender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, tick: u32) -> u64 {
        if let Some(last) = self.last
            && tick < last
        {
            self.rollovers += 1;
        }
        self.last = Some(tick);
        self.rollovers * TICK_MODULUS + u64::from(tick)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordedEdge {
    pub pin: u32,
    pub name: String,
    pub level: Level,
    pub tick: u32,
    pub timestamp_us: u64,
}

struct PinHistory {
    name: String,
    extender: TickExtender,
    high_count: u64,
    events: VecDeque<RecordedEdge>,
}

/// Edge handler shared by every monitored pin: keeps per-pin history and fans events out.
pub struct EventRecorder {
    event_tx: broadcast::Sender<RecordedEdge>,
    history: FxHashMap<u32, Mutex<PinHistory>>,
    history_capacity: usize,
}

impl EventRecorder {
    fn new(config: &AppConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        let history = config
            .pins
            .iter()
            .map(|(pin, cfg)| {
                (
                    *pin,
                    Mutex::new(PinHistory {
                        name: cfg.name.clone(),
                        extender: TickExtender::new(),
                        high_count: 0,
                        events: VecDeque::new(),
                    }),
                )
            })
            .collect();

        Self {
            event_tx,
            history,
            history_capacity: config.event_history_capacity.max(1),
        }
    }

    fn high_count(&self, pin: u32) -> u64 {
        self.history
            .get(&pin)
            .map(|h| h.lock().high_count)
            .unwrap_or(0)
    }
}

impl EdgeHandler for EventRecorder {
    fn on_event(&self, event: EdgeEvent) {
        let Some(history_lock) = self.history.get(&event.pin) else {
            warn!("edge on unmonitored pin {}", event.pin);
            return;
        };

        let recorded = {
            let mut history = history_lock.lock();
            let recorded = RecordedEdge {
                pin: event.pin,
                name: history.name.clone(),
                level: event.level,
                tick: event.tick,
                timestamp_us: history.extender.extend(event.tick),
            };
            if event.level.is_high() {
                history.high_count += 1;
            }
            while history.events.len() >= self.history_capacity {
                history.events.pop_front();
            }
            history.events.push_back(recorded.clone());
            recorded
        };

        let _ = self.event_tx.send(recorded);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PinStatus {
    pub info: PinConfig,
    pub state: SubscriptionState,
    pub pull: Option<PullMode>,
    pub callback_id: Option<CallbackId>,
    pub high_count: u64,
}

/// Host-side owner of the configured pins' subscriptions on one connection.
pub struct InterruptMonitor<D: PinDaemon> {
    config: Arc<AppConfig>,
    connection: Connection<D>,
    recorder: Arc<EventRecorder>,
    subscriptions: Mutex<FxHashMap<u32, Subscription<D>>>,
}

impl<D: PinDaemon> InterruptMonitor<D> {
    pub fn new(config: Arc<AppConfig>, daemon: Arc<D>) -> Self {
        let connection = Connection::with_options(daemon, config.interrupts);
        let recorder = Arc::new(EventRecorder::new(&config));

        Self {
            config,
            connection,
            recorder,
            subscriptions: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }

    fn pin_config(&self, pin: u32) -> Result<&PinConfig, GpioError> {
        self.config
            .pins
            .get(&pin)
            .ok_or_else(|| GpioError::NotFoundPin(pin.to_string()))
    }

    /// Applies configured pulls and subscribes every pin marked `subscribe`.
    pub fn start(&self) -> Result<(), GpioError> {
        let mut pins: Vec<_> = self.config.pins.iter().collect();
        pins.sort_by_key(|(pin, _)| **pin);

        for (pin, cfg) in pins {
            if let Some(pull) = cfg.pull {
                self.connection.set_pull(*pin, pull)?;
            }
            if cfg.subscribe {
                self.subscribe_pin(*pin)?;
                info!("watching pin {pin} ({})", cfg.name);
            }
        }
        Ok(())
    }

    pub fn subscribe_pin(&self, pin: u32) -> Result<PinStatus, GpioError> {
        self.pin_config(pin)?;

        let mut subscriptions = self.subscriptions.lock();
        let subscription = self
            .connection
            .subscribe_shared(pin, self.recorder.clone())?;
        subscriptions.insert(pin, subscription);
        drop(subscriptions);

        self.pin_status(pin)
    }

    pub fn unsubscribe_pin(&self, pin: u32) -> Result<(), GpioError> {
        self.pin_config(pin)?;

        let mut subscriptions = self.subscriptions.lock();
        let Some(subscription) = subscriptions.remove(&pin) else {
            return if self.connection.options().strict_unsubscribe {
                Err(GpioError::NotSubscribed { pin })
            } else {
                Ok(())
            };
        };

        if let Err(e) = subscription.unsubscribe() {
            if subscription.state() == SubscriptionState::Active {
                subscriptions.insert(pin, subscription);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn set_pull(&self, pin: u32, mode: PullMode) -> Result<PinStatus, GpioError> {
        self.pin_config(pin)?;
        self.connection.set_pull(pin, mode)?;
        self.pin_status(pin)
    }

    pub fn pin_status(&self, pin: u32) -> Result<PinStatus, GpioError> {
        let info = self.pin_config(pin)?.clone();
        let registry = self.connection.registry();

        Ok(PinStatus {
            info,
            state: registry.state(pin),
            pull: registry.pull(pin),
            callback_id: registry.callback_id(pin),
            high_count: self.recorder.high_count(pin),
        })
    }

    pub fn list_pins(&self) -> HashMap<u32, PinStatus> {
        self.config
            .pins
            .keys()
            .filter_map(|pin| self.pin_status(*pin).ok().map(|status| (*pin, status)))
            .collect()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RecordedEdge> {
        self.recorder.event_tx.subscribe()
    }

    pub fn events(&self, pin: u32, limit: Option<usize>) -> Result<Vec<RecordedEdge>, GpioError> {
        self.pin_config(pin)?;

        Ok(self
            .recorder
            .history
            .get(&pin)
            .map(|h| {
                let history = h.lock();
                let skip = limit
                    .map(|lim| history.events.len().saturating_sub(lim))
                    .unwrap_or(0);
                history.events.iter().skip(skip).cloned().collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    pub fn last_event(&self, pin: u32) -> Result<Option<RecordedEdge>, GpioError> {
        self.pin_config(pin)?;

        Ok(self
            .recorder
            .history
            .get(&pin)
            .and_then(|h| h.lock().events.back().cloned()))
    }

    /// Cancels every subscription this monitor holds.
    pub fn shutdown(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain().collect();
        for (pin, subscription) in subscriptions {
            if let Err(e) = subscription.unsubscribe() {
                warn!("failed to release pin {pin}: {e}");
            }
        }
    }
}
