//! Encode/decode between inner Ethernet frames and VXLAN-encapsulated UDP
//! payloads.
//!
//! This operates at the UDP payload granularity: the VXLAN header plus the
//! inner frame. The outer IPv4/UDP header is left to the kernel via
//! [`crate::socket`]'s listener, which is how a userspace `tokio`
//! `UdpSocket` actually sends and receives these packets; TTL/TOS are
//! per-socket options, not bytes this codec constructs by hand.

use crate::util::mac::Mac;
use crate::wire::header::{RawVxlanHeader, VXLAN_HEADER_LEN, VXLAN_I_FLAG};

/// Length of an Ethernet header up to and including the ethertype field
/// (no 802.1Q tag support).
pub const ETH_HEADER_LEN: usize = 14;

pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Outcome of decoding a UDP payload as a VXLAN packet: accept, not mine,
/// or malformed.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome<'a> {
    /// A well-formed VXLAN header carrying the given VNI, with `inner`
    /// pointing at the encapsulated Ethernet frame.
    Frame { vni: u32, inner: &'a [u8] },
    /// The packet is shorter than a VXLAN header, or the "I" flag is unset:
    /// this UDP port is receiving traffic that isn't VXLAN at all.
    NotVxlan,
    /// The "I" flag is set but the reserved byte is nonzero: malformed
    /// VXLAN, counted as a receive error rather than silently accepted. The
    /// VNI's high 24 bits are still well-formed and recoverable, so the
    /// demultiplexer can still resolve an endpoint to attribute the drop to.
    ProtocolError { vni: u32 },
}

/// Prefix `inner_frame` with a VXLAN header for `vni`.
pub fn encode(vni: u32, inner_frame: &[u8]) -> Vec<u8> {
    let header = RawVxlanHeader::new(vni);
    let mut packet = Vec::with_capacity(VXLAN_HEADER_LEN + inner_frame.len());
    packet.extend_from_slice(header.as_bytes());
    packet.extend_from_slice(inner_frame);
    packet
}

/// Decode a received UDP payload as a VXLAN packet.
pub fn decode(packet: &[u8]) -> DecodeOutcome<'_> {
    let Some(header) = RawVxlanHeader::from_bytes(packet) else {
        return DecodeOutcome::NotVxlan;
    };
    if header.flags() != VXLAN_I_FLAG {
        return DecodeOutcome::NotVxlan;
    }
    if header.reserved_low_byte() != 0 {
        return DecodeOutcome::ProtocolError { vni: header.vni() };
    }
    DecodeOutcome::Frame {
        vni: header.vni(),
        inner: &packet[VXLAN_HEADER_LEN..],
    }
}

/// The destination, source and ethertype of an Ethernet frame, as needed by
/// the FDB snoop/lookup and proxy-ARP paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthAddrs {
    pub dst: Mac,
    pub src: Mac,
    pub ethertype: u16,
}

/// Parse the destination MAC, source MAC and ethertype from the front of an
/// Ethernet frame. Returns `None` if the frame is shorter than
/// [`ETH_HEADER_LEN`].
pub fn parse_eth_addrs(frame: &[u8]) -> Option<EthAddrs> {
    if frame.len() < ETH_HEADER_LEN {
        return None;
    }
    let mut dst = [0u8; 6];
    let mut src = [0u8; 6];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    Some(EthAddrs {
        dst: Mac(dst),
        src: Mac(src),
        ethertype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_expected_header_bytes() {
        // VNI 10 -> wire VNI field 0x00000a00, flags 0x08000000.
        let packet = encode(10, &[0xaa; 20]);
        assert_eq!(&packet[0..4], &[0x08, 0x00, 0x00, 0x00]);
        assert_eq!(&packet[4..8], &[0x00, 0x00, 0x0a, 0x00]);
        assert_eq!(&packet[8..], &[0xaa; 20]);
    }

    #[test]
    fn round_trips_through_decode() {
        let inner = b"hello ethernet frame payload";
        let packet = encode(0x123456 & 0x00ff_ffff, inner);
        match decode(&packet) {
            DecodeOutcome::Frame { vni, inner: decoded } => {
                assert_eq!(vni, 0x123456 & 0x00ff_ffff);
                assert_eq!(decoded, inner);
            }
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn rejects_short_packets_as_not_vxlan() {
        assert_eq!(decode(&[0x08, 0x00]), DecodeOutcome::NotVxlan);
    }

    #[test]
    fn rejects_wrong_flags_as_not_vxlan() {
        let mut packet = encode(5, b"x");
        packet[0] = 0x00;
        assert_eq!(decode(&packet), DecodeOutcome::NotVxlan);
    }

    #[test]
    fn rejects_nonzero_reserved_byte_as_protocol_error() {
        let mut packet = encode(5, b"x");
        packet[7] = 0x01;
        assert_eq!(decode(&packet), DecodeOutcome::ProtocolError { vni: 5 });
    }

    #[test]
    fn parses_eth_addrs() {
        let mut frame = vec![0u8; ETH_HEADER_LEN + 4];
        frame[0..6].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        frame[6..12].copy_from_slice(&[0x11, 0x12, 0x13, 0x14, 0x15, 0x16]);
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        let addrs = parse_eth_addrs(&frame).unwrap();
        assert_eq!(addrs.dst, Mac([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]));
        assert_eq!(addrs.src, Mac([0x11, 0x12, 0x13, 0x14, 0x15, 0x16]));
        assert_eq!(addrs.ethertype, ETHERTYPE_IPV4);
    }

    #[test]
    fn rejects_short_frame() {
        assert!(parse_eth_addrs(&[0u8; 10]).is_none());
    }
}
