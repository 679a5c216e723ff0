/*!
    PC tool side of the bus, in `std` environment with `tokio`.

    The central resource is the [Link] struct which owns the byte stream to the devices and performs request/response exchanges.

    - for register access to one module of a device, use the [Device] struct which is a lightweight reference to [Link]
    - for sending a firmware image, use the [Upgrader] struct, also a reference to [Link]
*/

/// frame exchanges over the byte stream
mod link;
/// convenient methods to read/write registers of a module
mod accessing;
/// firmware upgrade client
mod upgrading;


pub use link::Link;
pub use accessing::*;
pub use upgrading::*;


use std::time::Duration;
use thiserror::Error;
use crate::{
    frame::FrameError,
    marshal::RegisterError,
    upgrade::UpgradeFailure,
    };

/// error regarding bus communication
#[derive(Error, Debug)]
pub enum Error {
    #[error("problem with serial bus")]
    Bus(#[from] std::io::Error),
    #[error("message cannot be framed: {0}")]
    Frame(#[from] FrameError),
    #[error("register access refused locally: {0}")]
    Register(#[from] RegisterError),
    #[error("device refused upgrade: {0}")]
    Upgrade(#[from] UpgradeFailure),
    /// device answered with an exception, carrying its `[parse, command, data]` status bytes
    #[error("device answered with exception {0:?}")]
    Exception([u8; 3]),
    #[error("no response arrived in expected time")]
    Timeout,
    #[error("unexpected response: {0}")]
    Unexpected(&'static str),
}

/// settings of a [Link]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    /// serial port baud rate
    pub baud: u32,
    /// time to wait for each response
    pub timeout: Duration,
    /// times a request is sent again when no response arrives
    pub retries: u8,
}
impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud: 460_800,
            timeout: Duration::from_millis(200),
            retries: 3,
        }
    }
}
