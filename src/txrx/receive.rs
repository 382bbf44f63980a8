//! The receive path: decode, demux by VNI, snoop, ECN decapsulation, and
//! upward delivery.

use std::net::Ipv4Addr;
use std::sync::Arc;

use crate::endpoint::{flag, Endpoint};
use crate::fdb::{opt, Destination, FdbState};
use crate::socket::Listener;
use crate::util::mac::Mac;
use crate::wire::{self, decapsulate_ecn, DecodeOutcome, EcnCodepoint, ETHERTYPE_IPV4};

/// What happened to one received UDP datagram.
#[derive(Debug)]
pub enum ReceiveOutcome {
    /// Decapsulated successfully; the caller hands this to the local
    /// network stack.
    Delivered(Vec<u8>),
    /// Accepted as VXLAN but dropped (malformed, loop, or forbidden
    /// migration); the relevant endpoint counter has already been bumped.
    Dropped,
    /// Not a VXLAN packet at all; return it to the UDP layer so another
    /// demuxer can try.
    NotMine,
}

/// Handle one datagram accepted by `listener`: decode the VXLAN header,
/// demux by VNI, and hand off to [`deliver_to_endpoint`].
pub fn receive_packet(
    listener: &Listener,
    packet: &[u8],
    outer_src_ip: Ipv4Addr,
    outer_ecn: EcnCodepoint,
) -> ReceiveOutcome {
    match wire::decode(packet) {
        DecodeOutcome::NotVxlan => ReceiveOutcome::NotMine,
        DecodeOutcome::ProtocolError { vni } => {
            // The reserved byte is nonzero, but the VNI's high 24 bits are
            // still well-formed, so the endpoint is still resolvable and
            // the drop can be attributed to it per §4.1 ("drop and count").
            if let Some(endpoint) = listener.lookup_vni(vni) {
                crate::counters::Counters::inc(&endpoint.counters.rx_frame_errors);
            }
            ReceiveOutcome::Dropped
        }
        DecodeOutcome::Frame { vni, inner } => match listener.lookup_vni(vni) {
            Some(endpoint) => deliver_to_endpoint(&endpoint, inner, outer_src_ip, outer_ecn),
            None => ReceiveOutcome::Dropped,
        },
    }
}

/// Loop check, snoop, and ECN decapsulation, given the endpoint already
/// resolved by VNI.
pub fn deliver_to_endpoint(
    endpoint: &Arc<Endpoint>,
    inner_frame: &[u8],
    outer_src_ip: Ipv4Addr,
    outer_ecn: EcnCodepoint,
) -> ReceiveOutcome {
    let Some(addrs) = wire::parse_eth_addrs(inner_frame) else {
        crate::counters::Counters::inc(&endpoint.counters.rx_frame_errors);
        return ReceiveOutcome::Dropped;
    };

    // Loop suppression: never accept a frame this
    // endpoint itself sourced.
    if addrs.src == endpoint.mac {
        crate::counters::Counters::inc(&endpoint.counters.rx_dropped);
        return ReceiveOutcome::Dropped;
    }

    if endpoint.config.has_flag(flag::LEARN) && snoop(endpoint, addrs.src, outer_src_ip).is_err() {
        crate::counters::Counters::inc(&endpoint.counters.rx_dropped);
        return ReceiveOutcome::Dropped;
    }

    let mut frame = inner_frame.to_vec();
    let inner_ecn = if addrs.ethertype == ETHERTYPE_IPV4 {
        inner_ipv4_ecn(&frame)
    } else {
        EcnCodepoint::NotEct
    };

    match decapsulate_ecn(outer_ecn, inner_ecn) {
        Err(_) => {
            crate::counters::Counters::inc(&endpoint.counters.rx_frame_errors);
            if endpoint.config.log_ecn_error && endpoint.ecn_log_limiter.allow() {
                tracing::warn!(
                    vni = endpoint.vni(),
                    src = %addrs.src,
                    "illegal ECN combination: CE outer with not-ECT inner"
                );
            }
            ReceiveOutcome::Dropped
        }
        Ok(resolved) => {
            if addrs.ethertype == ETHERTYPE_IPV4 && resolved != inner_ecn {
                set_inner_ipv4_ecn(&mut frame, resolved);
            }
            endpoint.counters.add_rx(frame.len() as u64);
            ReceiveOutcome::Delivered(frame)
        }
    }
}

/// Snoop: learn or validate `(src_mac, outer_src_ip)`.
/// Returns `Err(())` when the packet must be dropped (migration of a
/// `NOARP` entry).
fn snoop(endpoint: &Arc<Endpoint>, src_mac: Mac, outer_src_ip: Ipv4Addr) -> Result<(), ()> {
    let now = endpoint.now_ms();
    if let Some(entry) = endpoint.fdb.lookup(src_mac, now) {
        if entry.remotes.first().map(|d| d.remote_ip) == Some(outer_src_ip) {
            return Ok(());
        }
        if entry.state == FdbState::Noarp {
            return Err(());
        }
        let new_dst = Destination::new(outer_src_ip);
        let _ = endpoint.fdb.create_or_update(
            src_mac,
            new_dst,
            FdbState::Reachable,
            crate::fdb::flags::SELF,
            opt::REPLACE,
            now,
        );
    } else {
        // Capacity errors silently fail to learn;
        // they are not a reason to drop an otherwise-valid packet.
        let _ = endpoint.fdb.create_or_update(
            src_mac,
            Destination::new(outer_src_ip),
            FdbState::Reachable,
            crate::fdb::flags::SELF,
            opt::CREATE | opt::EXCL,
            now,
        );
    }
    Ok(())
}

/// Extract the ECN codepoint from an inner IPv4 header's low 2 TOS bits.
fn inner_ipv4_ecn(frame: &[u8]) -> EcnCodepoint {
    const ETH_HEADER_LEN: usize = 14;
    match frame.get(ETH_HEADER_LEN + 1) {
        Some(&tos_byte) => EcnCodepoint::from_bits(tos_byte),
        None => EcnCodepoint::NotEct,
    }
}

fn set_inner_ipv4_ecn(frame: &mut [u8], ecn: EcnCodepoint) {
    const ETH_HEADER_LEN: usize = 14;
    if let Some(tos_byte) = frame.get_mut(ETH_HEADER_LEN + 1) {
        *tos_byte = (*tos_byte & !0b11) | ecn.to_bits();
    }
}
