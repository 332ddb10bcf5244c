//! Serial telemetry link for small embedded devices.
//!
//! A [`ConnectionManager`] keeps one serial port open across unplugs and
//! resets, writes queued commands, frames incoming lines, decodes
//! temperature/humidity readings from them and keeps the most recent ones in
//! a [`SampleRing`].

pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod frame;
pub mod link;
pub mod logbook;
pub mod manager;
pub mod outbox;
pub mod poll;
pub mod port;
pub mod proto;
pub mod samples;
pub mod state;

pub use config::{ConnectionConfig, Timing};
pub use decode::decode;
pub use error::{FailureKind, LinkError, ManagerError};
pub use events::{Disconnect, EventSubscriber, LinkEvent};
pub use link::{Connector, Link};
pub use manager::{CommandSender, ConnectionManager, ManagerOptions};
pub use samples::{Reading, Sample, SampleRing};
pub use state::ConnectionState;
