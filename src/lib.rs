//! linkbroker library root.
//!
//! A WebSocket broker that lets named instances register, exchange direct
//! and broadcast messages, and track delivery and read receipts.

pub mod broker;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod store;

pub use broker::{Broker, BrokerStats};
pub use cli::Commands;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_settings, Settings};
pub use error::{Error, ProtocolError, Result};
pub use protocol::{ClientRequest, Instance, Message, Priority, ServerFrame};
pub use server::{run_server, BoundServer, BrokerServer, RunningServer};
