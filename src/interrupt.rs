//! Edge-triggered interrupt subscriptions.
//!
//! A pin moves through `Unregistered -> Registering -> Active -> Cancelling -> Unregistered`.
//! Registrations live only as long as the daemon session; after a reconnect they have to be
//! made again.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::connection::{Connection, PinAddress};
use crate::daemon::{CallbackId, EdgeKind, EdgeSink, PinDaemon, PullMode, StatusCode};
use crate::error::GpioError;

const WATCHDOG_LEVEL: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubscriptionState {
    Unregistered,
    Registering,
    Active,
    Cancelling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_u8(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// A genuine transition of `pin` to `level` at daemon time `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EdgeEvent {
    pub pin: u32,
    pub level: Level,
    pub tick: u32,
}

impl EdgeEvent {
    pub fn new(pin: u32, high: bool, tick: u32) -> Self {
        Self {
            pin,
            level: Level::from(high),
            tick,
        }
    }
}

/// A daemon notification, decoded once at the delivery boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawNotification {
    Edge { level: bool, tick: u32 },
    WatchdogExpired,
}

impl RawNotification {
    pub fn from_raw(level: u32, tick: u32) -> Self {
        match level {
            WATCHDOG_LEVEL => RawNotification::WatchdogExpired,
            0 => RawNotification::Edge { level: false, tick },
            _ => RawNotification::Edge { level: true, tick },
        }
    }
}

/// Host code notified of filtered edges.
///
/// Runs on the daemon's delivery thread, which every pin of the connection shares, so it must
/// return promptly.
pub trait EdgeHandler: Send + Sync {
    fn on_event(&self, event: EdgeEvent);
}

impl<F> EdgeHandler for F
where
    F: Fn(EdgeEvent) + Send + Sync,
{
    fn on_event(&self, event: EdgeEvent) {
        self(event)
    }
}

/// The interrupt registration for one pin of one connection.
pub struct Subscription<D: PinDaemon> {
    connection: Connection<D>,
    pin: u32,
    callback_id: CallbackId,
}

impl<D: PinDaemon> Subscription<D> {
    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn address(&self) -> PinAddress {
        self.connection.address(self.pin)
    }

    pub fn callback_id(&self) -> CallbackId {
        self.callback_id
    }

    /// State of this registration as seen by the connection. A registration that has been
    /// cancelled or replaced reads as unregistered.
    pub fn state(&self) -> SubscriptionState {
        let registry = self.connection.registry();
        if registry.callback_id(self.pin) == Some(self.callback_id) {
            registry.state(self.pin)
        } else {
            SubscriptionState::Unregistered
        }
    }

    pub fn unsubscribe(&self) -> Result<(), GpioError> {
        self.connection.unsubscribe(self)
    }
}

impl<D: PinDaemon> fmt::Debug for Subscription<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("address", &self.address())
            .field("callback_id", &self.callback_id)
            .finish()
    }
}

impl<D: PinDaemon> Connection<D> {
    /// Prepares `pin` as a pulled-up input and registers `handler` for both edges.
    ///
    /// The pull-up is skipped when a bias was already chosen for this pin on this connection.
    /// Fails with [`GpioError::AlreadySubscribed`] without contacting the daemon if the pin is
    /// already registered.
    pub fn subscribe<H>(&self, pin: u32, handler: H) -> Result<Subscription<D>, GpioError>
    where
        H: EdgeHandler + 'static,
    {
        self.subscribe_shared(pin, Arc::new(handler))
    }

    pub fn subscribe_shared(
        &self,
        pin: u32,
        handler: Arc<dyn EdgeHandler>,
    ) -> Result<Subscription<D>, GpioError> {
        let slot = self.registry().slot(pin);
        {
            let mut slot = slot.lock();
            if slot.state != SubscriptionState::Unregistered {
                return Err(GpioError::AlreadySubscribed { pin });
            }
            slot.state = SubscriptionState::Registering;
            slot.handler = Some(handler);
        }

        let registered = self.register(pin);

        let mut slot = slot.lock();
        match registered {
            Ok(callback_id) => {
                slot.state = SubscriptionState::Active;
                slot.callback_id = Some(callback_id);
                debug!("pin {pin} subscribed with callback {}", callback_id.0);
                Ok(Subscription {
                    connection: self.clone(),
                    pin,
                    callback_id,
                })
            }
            Err(e) => {
                slot.release();
                Err(e)
            }
        }
    }

    fn register(&self, pin: u32) -> Result<CallbackId, GpioError> {
        let configurator = self.configurator();
        configurator.configure_as_input(pin)?;
        if self.registry().pull(pin).is_none() {
            configurator.set_pull(pin, PullMode::Up)?;
        }

        let sink: Arc<dyn EdgeSink> = self.registry().clone();
        self.daemon()
            .register_edge_callback(pin, EdgeKind::Either, sink)
            .map_err(|code| {
                warn!("edge callback on pin {pin} rejected: {code}");
                GpioError::rejected(pin, code)
            })
    }

    /// Cancels `subscription`. Cancelling one that is no longer held succeeds without a daemon
    /// call, unless the connection was created with `strict_unsubscribe`.
    ///
    /// The pin's bias is left as it is unless `reset_bias_on_unsubscribe` is set.
    pub fn unsubscribe(&self, subscription: &Subscription<D>) -> Result<(), GpioError> {
        let pin = subscription.pin;
        let slot = self.registry().slot(pin);
        {
            let mut slot = slot.lock();
            let held = subscription.connection.id() == self.id()
                && slot.state == SubscriptionState::Active
                && slot.callback_id == Some(subscription.callback_id);
            if !held {
                debug!("pin {pin} holds no matching subscription, nothing to cancel");
                return if self.options().strict_unsubscribe {
                    Err(GpioError::NotSubscribed { pin })
                } else {
                    Ok(())
                };
            }
            slot.state = SubscriptionState::Cancelling;
        }

        let cancelled = self
            .daemon()
            .cancel_callback(pin, subscription.callback_id);

        match cancelled {
            Ok(()) => {}
            Err(StatusCode::CALLBACK_NOT_FOUND) => {
                warn!(
                    "pin {pin} callback {} already unknown to the daemon",
                    subscription.callback_id.0
                );
            }
            Err(code) => {
                slot.lock().state = SubscriptionState::Active;
                warn!("cancel callback on pin {pin} rejected: {code}");
                return Err(GpioError::rejected(pin, code));
            }
        }

        // reset while still cancelling so a new subscribe cannot slip in before it
        let reset = if self.options().reset_bias_on_unsubscribe {
            self.daemon().set_pull_up_down(pin, PullMode::None)
        } else {
            Ok(())
        };

        {
            let mut slot = slot.lock();
            slot.release();
            if self.options().reset_bias_on_unsubscribe {
                // a reset is not a caller choice; the next subscribe pulls up again
                slot.pull = None;
            }
        }
        debug!("pin {pin} unsubscribed");

        reset.map_err(|code| GpioError::rejected(pin, code))?;
        Ok(())
    }
}
