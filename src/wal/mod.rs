//! Write-ahead log: append-only, length- and CRC-framed journal of
//! transaction boundaries and page before/after images (§4.C).

pub mod log;
pub mod record;

pub use log::WriteAheadLog;
pub use record::{Frame, WalRecord};
