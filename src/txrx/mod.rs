//! Transmit classifier and receive path.

pub mod receive;
pub mod transmit;

pub use receive::{deliver_to_endpoint, receive_packet, ReceiveOutcome};
pub use transmit::{transmit, TransmitOutcome, TxMetadata};
