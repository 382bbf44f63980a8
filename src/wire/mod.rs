//! The VXLAN wire format: header layout, encode/decode, and ECN propagation.

pub mod codec;
pub mod ecn;
pub mod header;

pub use codec::{decode, encode, parse_eth_addrs, DecodeOutcome, EthAddrs, ETHERTYPE_ARP, ETHERTYPE_IPV4};
pub use ecn::{decapsulate_ecn, encapsulate_ecn, EcnCodepoint, EcnError};
pub use header::{RawVxlanHeader, VNI_INHERIT, VNI_MAX, VXLAN_HEADER_LEN, VXLAN_I_FLAG};
