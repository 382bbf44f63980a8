//! The ARP neighbour cache, consumed as an opaque collaborator by the
//! proxy-ARP and route short-circuit paths.

use std::net::Ipv4Addr;

/// IPv4 neighbour resolution, consumed as `Arc<dyn NeighTable>`.
pub trait NeighTable: Send + Sync {
    /// Resolve `addr` to a MAC, as the proxy-ARP and route short-circuit
    /// paths do.
    fn lookup_ipv4(&self, addr: Ipv4Addr) -> Option<[u8; 6]>;
}

/// A static neighbour cache driven by explicit entries, for tests and for
/// integrators without a real kernel ARP table available.
#[cfg(any(test, feature = "testutil"))]
#[derive(Debug, Default)]
pub struct StaticNeighTable {
    entries: std::sync::RwLock<std::collections::HashMap<Ipv4Addr, [u8; 6]>>,
}

#[cfg(any(test, feature = "testutil"))]
impl StaticNeighTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: Ipv4Addr, mac: [u8; 6]) {
        self.entries.write().unwrap().insert(addr, mac);
    }
}

#[cfg(any(test, feature = "testutil"))]
impl NeighTable for StaticNeighTable {
    fn lookup_ipv4(&self, addr: Ipv4Addr) -> Option<[u8; 6]> {
        self.entries.read().unwrap().get(&addr).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_resolves_inserted_entries() {
        let table = StaticNeighTable::new();
        table.insert(Ipv4Addr::new(10, 0, 0, 1), [1, 2, 3, 4, 5, 6]);
        assert_eq!(
            table.lookup_ipv4(Ipv4Addr::new(10, 0, 0, 1)),
            Some([1, 2, 3, 4, 5, 6])
        );
        assert_eq!(table.lookup_ipv4(Ipv4Addr::new(10, 0, 0, 2)), None);
    }
}
