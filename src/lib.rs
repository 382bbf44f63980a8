//! `vxlan-core`: an async VXLAN tunnel endpoint.
//!
//! This crate implements the pieces of a Linux-style VXLAN driver that live
//! below the control plane: the wire codec and ECN handling ([`wire`]), the
//! per-endpoint forwarding database ([`fdb`]), the shared UDP listener and
//! VNI demultiplexer ([`socket`]), the endpoint lifecycle state machine
//! ([`endpoint`]), the transmit classifier and receive path ([`txrx`]), and
//! the control-plane message types that drive all of the above
//! ([`control`]). `route`/`neigh` are the collaborators a real bridge stack
//! and ARP/neighbour cache would supply.

pub mod control;
pub mod counters;
pub mod endpoint;
pub mod error;
pub mod fdb;
pub mod neigh;
pub mod route;
pub mod socket;
pub mod txrx;
pub mod util;
pub mod wire;

pub use control::{ControlPlane, CreateEndpoint, DeleteEndpoint, FdbAdd, FdbDel, FdbDump};
pub use endpoint::{Endpoint, EndpointConfig, EndpointConfigBuilder, EndpointState};
pub use error::{Error, Result};
pub use fdb::{Destination, FdbEntry, FdbNotification, FdbRecord, FdbState, FdbTable};
pub use socket::{Listener, NamespaceId, SocketRegistry};
pub use txrx::{receive_packet, transmit, ReceiveOutcome, TransmitOutcome, TxMetadata};
pub use util::mac::Mac;
