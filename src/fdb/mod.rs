//! The forwarding database: MAC → remote-destination table.

pub mod entry;
pub mod table;

pub use entry::{flags, opt, Destination, FdbEntry, FdbNotification, FdbRecord, FdbState};
pub use table::FdbTable;
