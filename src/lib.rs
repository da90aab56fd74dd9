pub mod backend;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod error;
pub mod interrupt;
pub mod monitor;
pub mod pin;
pub mod registry;
pub mod routes;

pub use config::{AppConfig, HttpConfig, InterruptOptions, PinConfig};
pub use connection::{Connection, ConnectionId, PinAddress};
pub use daemon::{CallbackId, EdgeKind, EdgeSink, PinDaemon, PinMode, PullMode, StatusCode};
pub use error::GpioError;
pub use interrupt::{
    EdgeEvent, EdgeHandler, Level, RawNotification, Subscription, SubscriptionState,
};
pub use monitor::{InterruptMonitor, PinStatus, RecordedEdge, TickExtender};
pub use pin::PinConfigurator;
pub use registry::PinRegistry;
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodDaemon;
pub use backend::{DaemonOp, MockDaemon};
