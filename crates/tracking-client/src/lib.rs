//! tracking-client: connection runtime for the hand-tracking daemon
//!
//! A [`Connection`] owns one channel to the daemon and a poll thread. The poll
//! thread decodes each inbound message, folds it into connection state (frame
//! history, attached devices, pending config requests, active policy) and then
//! hands an [`Event`] to every observer and subscriber, in arrival order.
//!
//! Callers on other threads may issue requests and synchronous queries at any
//! time. Connections are usually obtained from a [`ConnectionRegistry`], which
//! returns the same instance for the same [`ConnectionKey`].

mod error;
pub use error::{ClientError, Result};

pub mod config;
pub use config::{load_config_file, parse_config, ConnectionConfig};

pub mod metrics;
pub use metrics::ConnectionMetrics;

mod types;
pub use types::{
    ConfigOutcome, ConnectionKey, Device, DeviceFailure, DroppedFrame, Hand, HeadPose, Image,
    ImageFrame, LogEntry, PointMapping, PointMappingChange, TrackingFrame, Transform,
};

mod events;
pub use events::{Event, Observer};

mod frame_history;
pub use frame_history::FrameHistory;

mod devices;
pub use devices::DeviceRegistry;

mod transactions;
pub use transactions::{ConfigSink, PendingTransaction, TransactionTable};

mod pool;
pub use pool::{BufferPool, PooledBuffer};

mod handle;
mod inbound;
mod result_log;

mod connection;
pub use connection::Connection;

mod registry;
pub use registry::ConnectionRegistry;
