//! FDB entry, destination, and flag/state vocabulary.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::util::mac::Mac;
use crate::wire::VNI_INHERIT;

/// Reachability state of an [`FdbEntry`], modeled on the kernel neighbour
/// state vocabulary but scoped to the states this engine actually produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdbState {
    Reachable,
    Stale,
    Permanent,
    Noarp,
}

/// Administrative flag bits on an [`FdbEntry`], kept as a plain bitmask
/// rather than a bitflags dependency, since only two bits are ever used
/// here.
pub mod flags {
    /// Entry was created by local learning rather than administrative add.
    pub const SELF: u8 = 1 << 0;
    /// Entry participates in route short-circuit.
    pub const ROUTER: u8 = 1 << 1;
}

/// Modifier flags accepted by [`super::table::FdbTable::create_or_update`],
/// mirroring `NLM_F_CREATE`/`NLM_F_EXCL`/`NLM_F_REPLACE`/`NLM_F_APPEND`
/// from netlink's neighbour API.
pub mod opt {
    pub const CREATE: u8 = 1 << 0;
    pub const EXCL: u8 = 1 << 1;
    pub const REPLACE: u8 = 1 << 2;
    pub const APPEND: u8 = 1 << 3;
}

/// A single remote tunnel endpoint a frame may be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub remote_ip: Ipv4Addr,
    /// 0 means inherit the owning endpoint's `dst_port`.
    pub remote_port: u16,
    /// [`VNI_INHERIT`] means inherit the owning endpoint's VNI.
    pub remote_vni: u32,
    /// 0 means no fixed output device.
    pub remote_ifindex: u32,
}

impl Destination {
    pub fn new(remote_ip: Ipv4Addr) -> Self {
        Self {
            remote_ip,
            remote_port: 0,
            remote_vni: VNI_INHERIT,
            remote_ifindex: 0,
        }
    }
}

/// A learned or administratively-installed forwarding entry.
///
/// `last_used_ms` is the one field mutated off the write lock: the receive
/// and transmit hot paths update it with a relaxed atomic store on every
/// successful lookup, while every other field only
/// changes by the table publishing a freshly-built `Arc<FdbEntry>` under its
/// write lock (see [`super::table::FdbTable`]).
#[derive(Debug)]
pub struct FdbEntry {
    pub mac: Mac,
    pub state: FdbState,
    pub flags: u8,
    pub last_updated_ms: u64,
    last_used_ms: AtomicU64,
    pub remotes: Vec<Destination>,
}

impl FdbEntry {
    pub fn new(
        mac: Mac,
        state: FdbState,
        flags: u8,
        remotes: Vec<Destination>,
        now_ms: u64,
    ) -> Self {
        Self {
            mac,
            state,
            flags,
            last_updated_ms: now_ms,
            last_used_ms: AtomicU64::new(now_ms),
            remotes,
        }
    }

    /// Clone this entry's fields into a new entry, carrying over the current
    /// `last_used_ms` value. Used by the table's copy-on-write writers: the
    /// old `Arc<FdbEntry>` stays valid for any reader that already loaded it.
    pub fn clone_with(
        &self,
        state: FdbState,
        flags: u8,
        remotes: Vec<Destination>,
        now_ms: u64,
    ) -> Self {
        Self {
            mac: self.mac,
            state,
            flags,
            last_updated_ms: now_ms,
            last_used_ms: AtomicU64::new(self.last_used_ms()),
            remotes,
        }
    }

    pub fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Relaxed)
    }

    /// Record a successful lookup. Lock-free: callers on the packet path
    /// never take the FDB write lock for this.
    pub fn mark_used(&self, now_ms: u64) {
        self.last_used_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn is_permanent(&self) -> bool {
        self.state == FdbState::Permanent
    }

    pub fn is_router(&self) -> bool {
        self.flags & flags::ROUTER != 0
    }
}

/// One `(entry, destination)` pair as produced by
/// [`super::table::FdbTable::dump`].
#[derive(Debug, Clone, Copy)]
pub struct FdbRecord {
    pub mac: Mac,
    pub destination: Destination,
    pub state: FdbState,
    pub flags: u8,
    pub last_used_ms: u64,
    pub last_updated_ms: u64,
}

/// A notification the control plane would forward as `RTM_NEWNEIGH` /
/// `RTM_DELNEIGH`. This crate does not open a netlink socket
/// (out of scope); these values are what a caller wiring one up would
/// encode and send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdbNotification {
    NewNeigh { mac: Mac, state: FdbState, flags: u8 },
    DelNeigh { mac: Mac },
}
