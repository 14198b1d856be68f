//! tracking-channel: the opaque channel between a client and the tracking daemon
//!
//! The client sees the daemon only through the [`Channel`] primitives: open/close,
//! poll with a bounded timeout, fire-and-forget requests answered later by a
//! request id, and fully synchronous calls. How bytes move underneath (shared
//! memory, socket, local RPC) is the backend's business. The default build enables
//! a `mock` backend, an in-process daemon that tests and the CLI drive directly.

mod types;
pub use types::{OpenDevice, RawMessage};

mod error;
pub use error::{ChannelError, Result};

mod traits;
pub use traits::{Allocator, Channel, Connector};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockChannel, MockDaemon, MockDevice};
