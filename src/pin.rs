use log::{debug, warn};

use crate::daemon::{PinDaemon, PinMode, PullMode};
use crate::error::GpioError;
use crate::registry::PinRegistry;

/// Puts pins into a known electrical state before they are watched.
///
/// Every change is recorded in the connection's registry so a later subscription knows whether
/// the caller already chose a bias for the pin.
pub struct PinConfigurator<'a, D: PinDaemon> {
    daemon: &'a D,
    registry: &'a PinRegistry,
}

impl<'a, D: PinDaemon> PinConfigurator<'a, D> {
    pub(crate) fn new(daemon: &'a D, registry: &'a PinRegistry) -> Self {
        Self { daemon, registry }
    }

    /// Sets the pin's direction to input. A pin this connection already made an input is left
    /// alone.
    pub fn configure_as_input(&self, pin: u32) -> Result<(), GpioError> {
        let slot = self.registry.slot(pin);
        if slot.lock().mode == Some(PinMode::Input) {
            return Ok(());
        }

        self.daemon.set_mode(pin, PinMode::Input).map_err(|code| {
            warn!("set mode input on pin {pin} rejected: {code}");
            GpioError::rejected(pin, code)
        })?;
        slot.lock().mode = Some(PinMode::Input);
        debug!("pin {pin} configured as input");

        Ok(())
    }

    /// Applies `mode` immediately. Safe while the pin has an active subscription.
    pub fn set_pull(&self, pin: u32, mode: PullMode) -> Result<(), GpioError> {
        self.daemon.set_pull_up_down(pin, mode).map_err(|code| {
            warn!("set pull {mode:?} on pin {pin} rejected: {code}");
            GpioError::rejected(pin, code)
        })?;
        self.registry.slot(pin).lock().pull = Some(mode);
        debug!("pin {pin} pull set to {mode:?}");

        Ok(())
    }
}
