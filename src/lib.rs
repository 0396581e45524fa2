//! Command/response core for a PX4IO-style I/O coprocessor: register
//! transport, status and safety synchronisation, RC input decoding, output
//! scheduling and the caller-facing control operations.
#![cfg_attr(not(test), no_std)]

pub(crate) mod log;

pub mod drivers;
pub mod error;
pub mod host;
pub mod registers;
pub mod state;
pub mod tasks;

pub use drivers::outputs::PwmTables;
pub use drivers::px4io::{DriverState, Px4Io, Px4IoConfig};
pub use drivers::transport::Link;
pub use error::{Error, LinkFault, RecoveryStage, Result};
pub use host::{Clock, IoHost, MixerTables};
pub use tasks::io_task::{ControlHandle, SharedPx4Io};
