//! The transmit classifier: proxy-ARP, FDB lookup, route short-circuit, and
//! per-destination encapsulation.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use crate::endpoint::{flag, Endpoint, MetadataMode};
use crate::error::Result;
use crate::fdb::Destination;
use crate::route::RouteKey;
use crate::txrx::receive::deliver_to_endpoint;
use crate::util::hash::{flow_hash, scale_to_range};
use crate::util::mac::Mac;
use crate::wire::{self, encapsulate_ecn, EcnCodepoint, EthAddrs, ETHERTYPE_ARP, ETHERTYPE_IPV4};

const ARP_HEADER_LEN: usize = 28;
const ARP_REQUEST: u16 = 1;
const ARP_REPLY: u16 = 2;

/// Per-frame destination selection.
#[derive(Debug, Clone, Copy)]
pub enum TxMetadata {
    UseFdb,
    Explicit(Destination),
}

/// Outcome of one `transmit()` call.
#[derive(Debug)]
pub enum TransmitOutcome {
    /// Every destination was handled (sent, locally delivered, or
    /// dropped); counters already reflect what happened.
    Handled,
    /// A proxy-ARP reply or other upcall frame for the caller to deliver
    /// upward instead of transmitting.
    Upcall(Vec<u8>),
}

/// Transmit one local inner Ethernet frame out `endpoint`.
pub async fn transmit(
    endpoint: &Arc<Endpoint>,
    frame: &[u8],
    metadata: TxMetadata,
) -> Result<TransmitOutcome> {
    let Some(addrs) = wire::parse_eth_addrs(frame) else {
        crate::counters::Counters::inc(&endpoint.counters.tx_errors);
        return Ok(TransmitOutcome::Handled);
    };

    if endpoint.config.has_flag(flag::PROXY) && addrs.ethertype == ETHERTYPE_ARP {
        if let Some(reply) = try_proxy_arp(endpoint, frame, &addrs) {
            return Ok(TransmitOutcome::Upcall(reply));
        }
    }

    match metadata {
        TxMetadata::Explicit(dst) => {
            xmit_one(endpoint, dst, frame, &addrs).await?;
            Ok(TransmitOutcome::Handled)
        }
        TxMetadata::UseFdb if endpoint.config.metadata_mode == MetadataMode::Explicit => {
            Err(crate::error::Error::InvalidArgument(
                "endpoint has collect_metadata set: transmit requires an explicit Destination"
                    .into(),
            ))
        }
        TxMetadata::UseFdb => {
            transmit_via_fdb(endpoint, frame, &addrs).await?;
            Ok(TransmitOutcome::Handled)
        }
    }
}

async fn transmit_via_fdb(endpoint: &Arc<Endpoint>, frame: &[u8], addrs: &EthAddrs) -> Result<()> {
    let now = endpoint.now_ms();
    let mut dst_mac = addrs.dst;
    let mut entry = endpoint
        .fdb
        .lookup(dst_mac, now)
        .or_else(|| endpoint.fdb.lookup(Mac::ZERO, now));

    if entry.is_none() {
        if dst_mac.is_unicast() && endpoint.config.has_flag(flag::L2MISS) {
            tracing::debug!(vni = endpoint.vni(), mac = %dst_mac, "l2miss");
        }
        crate::counters::Counters::inc(&endpoint.counters.tx_dropped);
        return Ok(());
    }

    if let Some(e) = &entry {
        if e.is_router()
            && endpoint.config.has_flag(flag::RSC)
            && addrs.ethertype == ETHERTYPE_IPV4
        {
            if let Some(dst_ip) = inner_ipv4_dst(frame) {
                if let Some(resolved_mac) = endpoint.neigh_table.lookup_ipv4(dst_ip) {
                    dst_mac = Mac(resolved_mac);
                    entry = endpoint
                        .fdb
                        .lookup(dst_mac, now)
                        .or_else(|| endpoint.fdb.lookup(Mac::ZERO, now));
                }
            }
        }
    }

    let Some(entry) = entry else {
        crate::counters::Counters::inc(&endpoint.counters.tx_dropped);
        return Ok(());
    };

    let mut rewritten;
    let out_frame: &[u8] = if dst_mac != addrs.dst {
        rewritten = frame.to_vec();
        rewritten[0..6].copy_from_slice(&dst_mac.0);
        &rewritten
    } else {
        frame
    };

    for destination in entry.remotes.clone() {
        xmit_one(endpoint, destination, out_frame, addrs).await?;
    }
    Ok(())
}

/// Send (or locally deliver) one frame to a single destination.
async fn xmit_one(
    endpoint: &Arc<Endpoint>,
    destination: Destination,
    frame: &[u8],
    addrs: &EthAddrs,
) -> Result<()> {
    let effective_port = if destination.remote_port != 0 {
        destination.remote_port
    } else {
        endpoint.config.dst_port
    };
    let effective_vni = if destination.remote_vni != wire::VNI_INHERIT {
        destination.remote_vni
    } else {
        endpoint.config.vni
    };

    if destination.remote_ip.is_unspecified() {
        deliver_local_bypass(endpoint, effective_vni, frame);
        return Ok(());
    }

    let tos_for_route = endpoint.config.effective_tos(inner_ipv4_dscp(frame, addrs));
    let route = endpoint.route_table.lookup(RouteKey {
        oif: (destination.remote_ifindex != 0).then_some(destination.remote_ifindex),
        dst: destination.remote_ip,
        src: endpoint.config.local_source_ip,
        tos: tos_for_route,
    });
    let Some(route) = route else {
        crate::counters::Counters::inc(&endpoint.counters.tx_carrier_errors);
        return Ok(());
    };

    if let Some(own_link) = endpoint.config.link {
        if route.oif == own_link {
            crate::counters::Counters::inc(&endpoint.counters.collisions);
            return Ok(());
        }
    }

    if route.is_local {
        if let Some(listener) = endpoint.listener() {
            if let Some(target) = listener.lookup_vni(effective_vni) {
                deliver_to_other_endpoint(endpoint, &target, frame);
                return Ok(());
            }
        }
    }

    let Some(listener) = endpoint.listener() else {
        crate::counters::Counters::inc(&endpoint.counters.tx_errors);
        return Ok(());
    };

    let ttl = if endpoint.config.ttl != 0 {
        endpoint.config.ttl
    } else if endpoint.config.ttl_inherit {
        inner_ipv4_ttl(frame, addrs).unwrap_or(route.ttl_hint)
    } else if destination.remote_ip.is_multicast() {
        1
    } else {
        route.ttl_hint
    };

    let inner_ecn = if addrs.ethertype == ETHERTYPE_IPV4 {
        inner_ipv4_ecn(frame)
    } else {
        EcnCodepoint::NotEct
    };
    let outer_ecn = encapsulate_ecn(inner_ecn);
    let tos = (tos_for_route & !0b11) | outer_ecn.to_bits();

    let packet = wire::encode(effective_vni, frame);
    // `select_source_port` computes the ECMP-spreading outer UDP source port
    // for this flow, but this crate's one shared listener socket cannot bind
    // a distinct source port per send (see DESIGN.md), so the computed value
    // is only exercised by `source_port_is_stable_for_same_flow_p5` below
    // pending a multi-socket source-port pool in a future revision.
    let _src_port = select_source_port(endpoint, addrs.src, addrs.dst, addrs.ethertype);

    let dst_addr = SocketAddr::from((destination.remote_ip, effective_port));
    listener
        .send_to(&packet, dst_addr, ttl, tos, endpoint.config.udp_csum)
        .await?;
    endpoint.counters.add_tx(packet.len() as u64);
    Ok(())
}

fn deliver_local_bypass(endpoint: &Arc<Endpoint>, _effective_vni: u32, frame: &[u8]) {
    match deliver_to_endpoint(endpoint, frame, Ipv4Addr::UNSPECIFIED, EcnCodepoint::NotEct) {
        crate::txrx::receive::ReceiveOutcome::Delivered(_) => {
            endpoint.counters.add_tx(frame.len() as u64);
        }
        _ => {
            crate::counters::Counters::inc(&endpoint.counters.tx_dropped);
        }
    }
}

fn deliver_to_other_endpoint(source: &Arc<Endpoint>, target: &Arc<Endpoint>, frame: &[u8]) {
    match deliver_to_endpoint(target, frame, Ipv4Addr::LOCALHOST, EcnCodepoint::NotEct) {
        crate::txrx::receive::ReceiveOutcome::Delivered(_) => {
            source.counters.add_tx(frame.len() as u64);
        }
        _ => {
            crate::counters::Counters::inc(&source.counters.tx_dropped);
        }
    }
}

fn select_source_port(endpoint: &Arc<Endpoint>, src: Mac, dst: Mac, l3_proto: u16) -> u16 {
    let (lo, hi) = endpoint.config.src_port_range;
    let range = (hi as u32).saturating_sub(lo as u32) + 1;
    let hash = flow_hash(src, dst, l3_proto);
    lo + scale_to_range(hash, range) as u16
}

fn try_proxy_arp(endpoint: &Arc<Endpoint>, frame: &[u8], addrs: &EthAddrs) -> Option<Vec<u8>> {
    const ETH_LEN: usize = 14;
    if frame.len() < ETH_LEN + ARP_HEADER_LEN {
        return None;
    }
    let arp = &frame[ETH_LEN..ETH_LEN + ARP_HEADER_LEN];
    let opcode = u16::from_be_bytes([arp[6], arp[7]]);
    if opcode != ARP_REQUEST {
        return None;
    }
    let sender_mac = &arp[8..14];
    let sender_ip = Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
    let target_ip = Ipv4Addr::new(arp[24], arp[25], arp[26], arp[27]);

    match endpoint.neigh_table.lookup_ipv4(target_ip) {
        Some(resolved_mac) => Some(build_arp_reply(
            addrs.src,
            resolved_mac,
            sender_mac.try_into().unwrap(),
            sender_ip,
            target_ip,
        )),
        None => {
            if endpoint.config.has_flag(flag::L3MISS) {
                tracing::debug!(vni = endpoint.vni(), %target_ip, "l3miss");
            }
            None
        }
    }
}

fn build_arp_reply(
    requester_mac: Mac,
    resolved_mac: [u8; 6],
    requester_arp_mac: [u8; 6],
    requester_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(14 + ARP_HEADER_LEN);
    frame.extend_from_slice(&requester_mac.0);
    frame.extend_from_slice(&resolved_mac);
    frame.extend_from_slice(&ETHERTYPE_ARP.to_be_bytes());

    frame.extend_from_slice(&1u16.to_be_bytes()); // hw_type: Ethernet
    frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes()); // proto_type
    frame.push(6); // hw_len
    frame.push(4); // proto_len
    frame.extend_from_slice(&ARP_REPLY.to_be_bytes());
    frame.extend_from_slice(&resolved_mac); // sha
    frame.extend_from_slice(&target_ip.octets()); // spa
    frame.extend_from_slice(&requester_arp_mac); // tha
    frame.extend_from_slice(&requester_ip.octets()); // tpa
    frame
}

fn inner_ipv4_dst(frame: &[u8]) -> Option<Ipv4Addr> {
    const ETH_LEN: usize = 14;
    let ip = frame.get(ETH_LEN..ETH_LEN + 20)?;
    Some(Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]))
}

fn inner_ipv4_dscp(frame: &[u8], addrs: &EthAddrs) -> u8 {
    const ETH_LEN: usize = 14;
    if addrs.ethertype != ETHERTYPE_IPV4 {
        return 0;
    }
    frame.get(ETH_LEN + 1).map(|b| b & !0b11).unwrap_or(0)
}

fn inner_ipv4_ecn(frame: &[u8]) -> EcnCodepoint {
    const ETH_LEN: usize = 14;
    match frame.get(ETH_LEN + 1) {
        Some(&tos) => EcnCodepoint::from_bits(tos),
        None => EcnCodepoint::NotEct,
    }
}

fn inner_ipv4_ttl(frame: &[u8], addrs: &EthAddrs) -> Option<u8> {
    const ETH_LEN: usize = 14;
    if addrs.ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    frame.get(ETH_LEN + 8).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointConfigBuilder;
    use crate::fdb::opt;
    use crate::neigh::StaticNeighTable;
    use crate::route::{RouteResult, StaticRouteTable};
    use crate::socket::SocketRegistry;

    fn eth_frame(src: Mac, dst: Mac, ethertype: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&dst.0);
        frame.extend_from_slice(&src.0);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    async fn ready_endpoint(vni: u32, default_remote: Option<Ipv4Addr>) -> Arc<Endpoint> {
        let mut builder = EndpointConfigBuilder::new(vni);
        if let Some(ip) = default_remote {
            builder = builder.default_remote(ip);
        }
        let config = builder.build();
        let route_table = Arc::new(StaticRouteTable::new());
        if let Some(ip) = default_remote {
            route_table.insert_for_dst(
                ip,
                RouteResult {
                    oif: 999,
                    is_local: false,
                    gateway: None,
                    ttl_hint: 64,
                },
            );
        }
        let endpoint = Endpoint::new(
            config,
            Mac([0x02, 0, 0, 0, 0, vni as u8]),
            route_table,
            Arc::new(StaticNeighTable::new()),
        );
        let registry = SocketRegistry::new();
        endpoint
            .create(&registry, 0, Ipv4Addr::UNSPECIFIED)
            .await
            .unwrap();
        endpoint.open().await.unwrap();
        endpoint
    }

    #[tokio::test]
    async fn unknown_unicast_floods_to_default_scenario_1() {
        let endpoint = ready_endpoint(10, Some(Ipv4Addr::new(239, 1, 1, 1))).await;
        let src = Mac([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x01]);
        let dst = Mac([0xbb, 0xbb, 0xbb, 0xbb, 0xbb, 0x02]);
        let frame = eth_frame(src, dst, ETHERTYPE_IPV4, &[0; 20]);

        transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap();
        assert_eq!(endpoint.counters.tx_packets(), 1);
    }

    /// Not scenario 5: this exercises the `remote_ip == 0` same-endpoint
    /// bypass in `xmit_one` (no route lookup, no other endpoint involved),
    /// which is a different code path from the cross-endpoint local-delivery
    /// short-circuit. See `cross_endpoint_local_delivery_scenario_5` below
    /// for the latter.
    #[tokio::test]
    async fn same_endpoint_bypass_on_unspecified_remote_ip() {
        let endpoint = ready_endpoint(20, None).await;
        let src = Mac([0xaa; 6]);
        let dst = Mac([0xbb; 6]);
        endpoint
            .fdb
            .create_or_update(
                dst,
                Destination::new(Ipv4Addr::UNSPECIFIED),
                crate::fdb::FdbState::Permanent,
                0,
                opt::CREATE,
                0,
            )
            .unwrap();

        let frame = eth_frame(src, dst, ETHERTYPE_IPV4, &[0; 20]);
        transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap();
        assert_eq!(endpoint.counters.tx_packets(), 1);
        assert_eq!(endpoint.counters.rx_packets(), 1);
    }

    /// §8 scenario 5: two endpoints on the same listener (same namespace,
    /// VNI, and `dst_port`); endpoint A's FDB maps the destination MAC to a
    /// route that resolves `is_local`. Expect `xmit_one`'s local-delivery
    /// short-circuit (transmit.rs's `route.is_local` branch) to inject the
    /// frame directly into endpoint B's receive path rather than sending a
    /// UDP datagram — if it instead fell through to a real socket send,
    /// endpoint B's counters would never move, since nothing in this test
    /// drains its socket.
    #[tokio::test]
    async fn cross_endpoint_local_delivery_scenario_5() {
        let route_table = Arc::new(StaticRouteTable::new());
        route_table.insert_for_dst(
            Ipv4Addr::new(127, 0, 0, 1),
            RouteResult {
                oif: 999,
                is_local: true,
                gateway: None,
                ttl_hint: 64,
            },
        );

        let registry = SocketRegistry::new();
        let config_a = EndpointConfigBuilder::new(20).build();
        let endpoint_a = Endpoint::new(
            config_a,
            Mac([0x02, 0, 0, 0, 0, 0xa1]),
            route_table.clone(),
            Arc::new(StaticNeighTable::new()),
        );
        endpoint_a
            .create(&registry, 0, Ipv4Addr::UNSPECIFIED)
            .await
            .unwrap();
        endpoint_a.open().await.unwrap();

        let config_b = EndpointConfigBuilder::new(20)
            .dst_port(endpoint_a.config.dst_port)
            .build();
        let endpoint_b = Endpoint::new(
            config_b,
            Mac([0x02, 0, 0, 0, 0, 0xb2]),
            route_table,
            Arc::new(StaticNeighTable::new()),
        );
        endpoint_b
            .create(&registry, 0, Ipv4Addr::UNSPECIFIED)
            .await
            .unwrap();
        endpoint_b.open().await.unwrap();

        let dst = Mac([0xbb; 6]);
        endpoint_a
            .fdb
            .create_or_update(
                dst,
                Destination::new(Ipv4Addr::new(127, 0, 0, 1)),
                crate::fdb::FdbState::Permanent,
                0,
                opt::CREATE,
                0,
            )
            .unwrap();

        let frame = eth_frame(Mac([0xaa; 6]), dst, ETHERTYPE_IPV4, &[0; 20]);
        transmit(&endpoint_a, &frame, TxMetadata::UseFdb).await.unwrap();

        assert_eq!(endpoint_a.counters.tx_packets(), 1);
        assert_eq!(endpoint_a.counters.tx_dropped(), 0);
        assert_eq!(endpoint_b.counters.rx_packets(), 1);
        assert_eq!(endpoint_b.counters.rx_bytes(), frame.len() as u64);
    }

    #[tokio::test]
    async fn l2miss_unicast_with_no_default_is_dropped() {
        let endpoint = ready_endpoint(30, None).await;
        let src = Mac([0xaa; 6]);
        let dst = Mac([0xbb; 6]);
        let frame = eth_frame(src, dst, ETHERTYPE_IPV4, &[0; 20]);
        transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap();
        assert_eq!(endpoint.counters.tx_dropped(), 1);
        assert_eq!(endpoint.counters.tx_packets(), 0);
    }

    #[tokio::test]
    async fn proxy_arp_replies_from_neigh_cache() {
        let config = EndpointConfigBuilder::new(40).proxy(true).build();
        let target_ip = Ipv4Addr::new(10, 0, 0, 9);
        let resolved_mac = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];
        let neigh = StaticNeighTable::new();
        neigh.insert(target_ip, resolved_mac);
        let endpoint = Endpoint::new(
            config,
            Mac([0x02, 0, 0, 0, 0, 0x40]),
            Arc::new(StaticRouteTable::new()),
            Arc::new(neigh),
        );

        let requester_mac = Mac([0xaa; 6]);
        let mut arp = vec![0u8; ARP_HEADER_LEN];
        arp[0..2].copy_from_slice(&1u16.to_be_bytes());
        arp[2..4].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        arp[4] = 6;
        arp[5] = 4;
        arp[6..8].copy_from_slice(&ARP_REQUEST.to_be_bytes());
        arp[8..14].copy_from_slice(&requester_mac.0);
        arp[14..18].copy_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        arp[24..28].copy_from_slice(&target_ip.octets());

        let frame = eth_frame(requester_mac, Mac([0xff; 6]), ETHERTYPE_ARP, &arp);
        let outcome = transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap();
        match outcome {
            TransmitOutcome::Upcall(reply) => {
                assert_eq!(&reply[0..6], &requester_mac.0);
                assert_eq!(&reply[6..12], &resolved_mac);
            }
            other => panic!("expected Upcall, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn route_absent_counts_tx_carrier_errors() {
        let endpoint = ready_endpoint(50, None).await;
        let dst = Mac([0xbb; 6]);
        endpoint
            .fdb
            .create_or_update(
                dst,
                Destination::new(Ipv4Addr::new(10, 0, 0, 50)),
                crate::fdb::FdbState::Permanent,
                0,
                opt::CREATE,
                0,
            )
            .unwrap();
        let frame = eth_frame(Mac([0xaa; 6]), dst, ETHERTYPE_IPV4, &[0; 20]);
        transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap();
        assert_eq!(endpoint.counters.tx_carrier_errors(), 1);
    }

    #[tokio::test]
    async fn collect_metadata_rejects_implicit_fdb_transmit() {
        let config = EndpointConfigBuilder::new(60).collect_metadata(true).build();
        let endpoint = Endpoint::new(
            config,
            Mac([0x02, 0, 0, 0, 0, 0x60]),
            Arc::new(StaticRouteTable::new()),
            Arc::new(StaticNeighTable::new()),
        );
        let frame = eth_frame(Mac([0xaa; 6]), Mac([0xbb; 6]), ETHERTYPE_IPV4, &[0; 20]);
        let err = transmit(&endpoint, &frame, TxMetadata::UseFdb).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidArgument(_)));
    }

    #[test]
    fn source_port_is_stable_for_same_flow_p5() {
        let endpoint_a = EndpointConfigBuilder::new(1).build();
        let endpoint = Endpoint::new(
            endpoint_a,
            Mac::ZERO,
            Arc::new(StaticRouteTable::new()),
            Arc::new(StaticNeighTable::new()),
        );
        let src = Mac([1, 2, 3, 4, 5, 6]);
        let dst = Mac([6, 5, 4, 3, 2, 1]);
        let p1 = select_source_port(&endpoint, src, dst, ETHERTYPE_IPV4);
        let p2 = select_source_port(&endpoint, src, dst, ETHERTYPE_IPV4);
        assert_eq!(p1, p2);
        let (lo, hi) = endpoint.config.src_port_range;
        assert!(p1 >= lo && p1 <= hi);
    }
}
