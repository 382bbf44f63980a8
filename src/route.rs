//! IP routing, consumed as an opaque collaborator.
//!
//! The real Linux routing table is out of scope; this module defines the
//! interface the transmit path needs and, under `testutil`, a static
//! in-memory implementation for tests, for collaborators that cannot
//! safely be brought up without root.

use std::net::Ipv4Addr;

/// The lookup key for an outbound route: `(oif, dst, src, tos)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteKey {
    pub oif: Option<u32>,
    pub dst: Ipv4Addr,
    pub src: Option<Ipv4Addr>,
    pub tos: u8,
}

/// What a route lookup resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteResult {
    pub oif: u32,
    /// The route is a local unicast route, triggering local-delivery
    /// short-circuit in the transmit path.
    pub is_local: bool,
    pub gateway: Option<Ipv4Addr>,
    /// The route's TTL metric, used when the endpoint's own `ttl` is 0 and
    /// the destination is not multicast.
    pub ttl_hint: u8,
}

/// Route lookup, consumed as `Arc<dyn RouteTable>`.
pub trait RouteTable: Send + Sync {
    fn lookup(&self, key: RouteKey) -> Option<RouteResult>;
}

/// A static route table driven entirely by explicit entries, for tests and
/// for integrators without a real kernel routing table available.
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Default)]
pub struct StaticRouteTable {
    routes: std::sync::RwLock<Vec<(RouteKey, RouteResult)>>,
}

#[cfg(any(test, feature = "testutil"))]
impl StaticRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: RouteKey, result: RouteResult) {
        self.routes.write().unwrap().push((key, result));
    }

    /// Install a route that matches any key with `dst == dst` regardless of
    /// `oif`/`src`/`tos`, which is the common case in tests.
    pub fn insert_for_dst(&self, dst: Ipv4Addr, result: RouteResult) {
        self.routes.write().unwrap().push((
            RouteKey {
                oif: None,
                dst,
                src: None,
                tos: 0,
            },
            result,
        ));
    }
}

#[cfg(any(test, feature = "testutil"))]
impl RouteTable for StaticRouteTable {
    fn lookup(&self, key: RouteKey) -> Option<RouteResult> {
        let routes = self.routes.read().unwrap();
        routes
            .iter()
            .find(|(k, _)| {
                k.dst == key.dst
                    && (k.oif.is_none() || k.oif == key.oif)
                    && (k.src.is_none() || k.src == key.src)
            })
            .map(|(_, result)| *result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_matches_on_destination() {
        let table = StaticRouteTable::new();
        table.insert_for_dst(
            Ipv4Addr::new(10, 0, 0, 5),
            RouteResult {
                oif: 3,
                is_local: false,
                gateway: None,
                ttl_hint: 64,
            },
        );

        let result = table
            .lookup(RouteKey {
                oif: None,
                dst: Ipv4Addr::new(10, 0, 0, 5),
                src: None,
                tos: 0,
            })
            .unwrap();
        assert_eq!(result.oif, 3);

        assert!(table
            .lookup(RouteKey {
                oif: None,
                dst: Ipv4Addr::new(10, 0, 0, 6),
                src: None,
                tos: 0,
            })
            .is_none());
    }
}
