use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::info;
use serde::Serialize;

use crate::config::InterruptOptions;
use crate::daemon::{PinDaemon, PullMode};
use crate::error::GpioError;
use crate::pin::PinConfigurator;
use crate::registry::PinRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(u64);

/// A controllable line within one daemon session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PinAddress {
    pub connection: ConnectionId,
    pub pin: u32,
}

struct ConnectionInner<D: PinDaemon> {
    id: ConnectionId,
    daemon: Arc<D>,
    registry: Arc<PinRegistry>,
    options: InterruptOptions,
}

/// Handle to an open daemon session together with the pin registry this process keeps for it.
///
/// The daemon session itself is owned elsewhere and must outlive every subscription made
/// through this handle.
pub struct Connection<D: PinDaemon> {
    inner: Arc<ConnectionInner<D>>,
}

impl<D: PinDaemon> Clone for Connection<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: PinDaemon> Connection<D> {
    pub fn new(daemon: Arc<D>) -> Self {
        Self::with_options(daemon, InterruptOptions::default())
    }

    pub fn with_options(daemon: Arc<D>, options: InterruptOptions) -> Self {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                daemon,
                registry: Arc::new(PinRegistry::new()),
                options,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn address(&self, pin: u32) -> PinAddress {
        PinAddress {
            connection: self.inner.id,
            pin,
        }
    }

    pub fn daemon(&self) -> &Arc<D> {
        &self.inner.daemon
    }

    pub fn registry(&self) -> &Arc<PinRegistry> {
        &self.inner.registry
    }

    pub fn options(&self) -> &InterruptOptions {
        &self.inner.options
    }

    pub fn configurator(&self) -> PinConfigurator<'_, D> {
        PinConfigurator::new(self.inner.daemon.as_ref(), self.inner.registry.as_ref())
    }

    pub fn configure_as_input(&self, pin: u32) -> Result<(), GpioError> {
        self.configurator().configure_as_input(pin)
    }

    pub fn set_pull(&self, pin: u32, mode: PullMode) -> Result<(), GpioError> {
        self.configurator().set_pull(pin, mode)
    }

    /// Tells the core that the daemon session is gone. Every pin returns to unregistered and no
    /// daemon call is made; registrations must be re-established on a fresh connection.
    pub fn invalidate(&self) {
        self.inner.registry.clear();
        info!("connection {:?} invalidated", self.inner.id);
    }
}
