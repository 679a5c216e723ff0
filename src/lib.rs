/*!
    serial bus protocol stack linking the control boards of an electrically assisted vehicle

    - [frame] packs an [Envelope] into a byte-stuffed, checksummed wire frame and back
    - [registers] and [marshal] expose a module's typed state record as indexed registers
    - [coordinator] receives a firmware image in bounded frames with end-to-end checksums
    - [logging] encodes the log queries and log memory dumps of a board
    - [dispatch] routes decoded envelopes to the module handlers of a board

    the core is `no_std` and allocation free. Device side serving loop is behind feature `node`, PC tool side is behind feature `host`.
*/
#![no_std]
#[cfg(any(feature = "std", test))]
extern crate std;

mod mutex;
mod utils;

pub mod checksum;
pub mod frame;
pub mod command;
pub mod registers;
pub mod marshal;
pub mod region;
pub mod ble;
pub mod version;
pub mod upgrade;
pub mod coordinator;
pub mod logging;
pub mod dispatch;
#[cfg(feature = "node")]
pub mod node;
#[cfg(feature = "host")]
pub mod host;

pub use mutex::{BusyMutex, BusyMutexGuard};
pub use command::{Envelope, Command, Direction, Verb, ModuleId, MessageType};
pub use frame::{FrameError, FrameReader};
pub use marshal::RegisterError;
pub use upgrade::UpgradeFailure;
