//! The socket registry: one shared UDP listener per `(namespace, port)`,
//! and the per-listener VNI → endpoint table.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::Mutex as AsyncMutex;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};

/// Opaque network-namespace identifier. This crate does not enter or manage
/// real Linux network namespaces (out of scope); callers that do should map
/// their namespace handle to a stable `NamespaceId` before calling in.
pub type NamespaceId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ListenerKey {
    namespace: NamespaceId,
    port: u16,
}

/// The shared UDP receive object for one `(namespace, port)`.
///
/// Every endpoint on that port holds a strong [`Arc<Listener>`]; the
/// [`SocketRegistry`] hands out clones of the same `Arc` rather than
/// opening a second socket, so there is at most one `Listener` per
/// `(namespace, port)`. `vni_table` holds only a [`Weak`] back-reference to
/// each endpoint so that an endpoint's refcount is driven solely by its
/// owner, never by the listener it registers with.
pub struct Listener {
    key: ListenerKey,
    sock: UdpSocket,
    vni_table: RwLock<HashMap<u32, Weak<Endpoint>>>,
    refcount: AtomicUsize,
    /// Guards TTL/TOS socket options for the duration of one send, since a
    /// single socket is shared by endpoints that may each want a different
    /// outer TTL/TOS. A real per-packet-accurate implementation
    /// would use `sendmsg` ancillary data instead of serialising through a
    /// mutex; this is the pragmatic userspace-`tokio` equivalent. An async
    /// mutex, not `std::sync::Mutex`: the guard is held across the `.await`
    /// on `send_to`, and a std guard held across an await point blocks the
    /// holding task without yielding, which on a current-thread runtime
    /// starves every other task (including the one that would drop the
    /// lock) — a packet-path deadlock that contradicts §5's "packet-path
    /// operations never block."
    send_lock: AsyncMutex<()>,
    /// Refcounted IGMP membership, since several endpoints on this listener
    /// may share the same multicast `default_remote` group; the leave only
    /// actually happens once no other UP endpoint in the namespace still
    /// uses it.
    multicast_groups: Mutex<HashMap<Ipv4Addr, usize>>,
}

impl Listener {
    /// This endpoint's UDP destination port.
    pub fn port(&self) -> u16 {
        self.key.port
    }

    /// Register an endpoint's VNI in this listener's demux table. Replaces
    /// whatever the VNI previously mapped to.
    pub fn register_vni(&self, vni: u32, endpoint: &Arc<Endpoint>) {
        self.vni_table
            .write()
            .unwrap()
            .insert(vni, Arc::downgrade(endpoint));
    }

    pub fn unregister_vni(&self, vni: u32) {
        self.vni_table.write().unwrap().remove(&vni);
    }

    /// Resolve a VNI to its live endpoint, if any.
    pub fn lookup_vni(&self, vni: u32) -> Option<Arc<Endpoint>> {
        self.vni_table.read().unwrap().get(&vni)?.upgrade()
    }

    /// Send an encapsulated packet to `dst`, applying `ttl`/`tos`/`udp_csum`
    /// for the duration of this send only (the listener socket is shared by
    /// endpoints that may each want different outer header treatment).
    pub async fn send_to(
        &self,
        packet: &[u8],
        dst: SocketAddr,
        ttl: u8,
        tos: u8,
        udp_csum: bool,
    ) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        if ttl != 0 {
            self.sock.set_ttl(ttl as u32)?;
        }
        if tos != 0 {
            set_tos(&self.sock, tos)?;
        }
        set_checksum_enabled(&self.sock, udp_csum)?;
        self.sock.send_to(packet, dst).await?;
        Ok(())
    }

    /// Receive one datagram accepted by this listener.
    pub async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.sock.recv_from(buf).await?)
    }

    /// Join `group`, actually issuing the IGMP join only the first time any
    /// endpoint on this listener asks for it.
    pub fn join_multicast(&self, group: Ipv4Addr) -> Result<()> {
        let mut groups = self.multicast_groups.lock().unwrap();
        let count = groups.entry(group).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.sock.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
            tracing::debug!(%group, "igmp join");
        }
        Ok(())
    }

    /// Leave `group`, issuing the IGMP leave only when the last endpoint
    /// using it does so.
    pub fn leave_multicast(&self, group: Ipv4Addr) -> Result<()> {
        let mut groups = self.multicast_groups.lock().unwrap();
        if let Some(count) = groups.get_mut(&group) {
            *count -= 1;
            if *count == 0 {
                groups.remove(&group);
                self.sock.leave_multicast_v4(group, Ipv4Addr::UNSPECIFIED)?;
                tracing::debug!(%group, "igmp leave");
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
fn set_tos(sock: &UdpSocket, tos: u8) -> Result<()> {
    use std::os::fd::AsRawFd;
    let fd = sock.as_raw_fd();
    // SAFETY: `fd` is a valid, open socket for the lifetime of this call;
    // IP_TOS takes a plain `c_int` and this does not outlive the call.
    let rc = unsafe {
        let value = tos as libc::c_int;
        libc::setsockopt(
            fd,
            libc::IPPROTO_IP,
            libc::IP_TOS,
            &value as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_tos(_sock: &UdpSocket, _tos: u8) -> Result<()> {
    Ok(())
}

/// Toggle `SO_NO_CHECK`: when `enabled` is false (outer UDP checksum left at
/// zero, the default), the kernel skips generating a checksum for outgoing
/// datagrams on this socket; when `true`, normal checksumming applies. This
/// is the real per-socket knob backing the `udp_csum` attribute, since a
/// plain UDP socket has no way to write a literal zero checksum byte itself.
#[cfg(target_os = "linux")]
fn set_checksum_enabled(sock: &UdpSocket, enabled: bool) -> Result<()> {
    use std::os::fd::AsRawFd;
    let fd = sock.as_raw_fd();
    let no_check: libc::c_int = if enabled { 0 } else { 1 };
    // SAFETY: `fd` is a valid, open socket for the lifetime of this call;
    // SO_NO_CHECK takes a plain `c_int` and this does not outlive the call.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_NO_CHECK,
            &no_check as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_checksum_enabled(_sock: &UdpSocket, _enabled: bool) -> Result<()> {
    Ok(())
}

/// Per-namespace table of live listeners, keyed by UDP port. This is the
/// outermost lock in the crate's lock hierarchy.
pub struct SocketRegistry {
    listeners: Mutex<HashMap<ListenerKey, Arc<Listener>>>,
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Find or lazily create the listener for `(namespace, port)`, bumping
    /// its refcount. Created lazily when the first endpoint on its port is
    /// initialised.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(
        &self,
        namespace: NamespaceId,
        bind_addr: Ipv4Addr,
        port: u16,
    ) -> Result<Arc<Listener>> {
        let key = ListenerKey { namespace, port };

        {
            let listeners = self.listeners.lock().unwrap();
            if let Some(listener) = listeners.get(&key) {
                listener.refcount.fetch_add(1, Ordering::AcqRel);
                return Ok(listener.clone());
            }
        }

        let sock = bind_socket(bind_addr, port)?;
        let listener = Arc::new(Listener {
            key,
            sock,
            vni_table: RwLock::new(HashMap::new()),
            refcount: AtomicUsize::new(1),
            send_lock: AsyncMutex::new(()),
            multicast_groups: Mutex::new(HashMap::new()),
        });

        let mut listeners = self.listeners.lock().unwrap();
        // Another task may have raced us to create the same listener while
        // we were binding the socket; prefer whichever was inserted first.
        match listeners.get(&key) {
            Some(existing) => {
                existing.refcount.fetch_add(1, Ordering::AcqRel);
                Ok(existing.clone())
            }
            None => {
                listeners.insert(key, listener.clone());
                tracing::debug!(port, "listener created");
                Ok(listener)
            }
        }
    }

    /// Drop a reference to a listener, tearing it down once the refcount
    /// reaches zero. Teardown runs exactly once, the moment the count hits
    /// zero.
    pub fn release(&self, listener: &Arc<Listener>) {
        if listener.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut listeners = self.listeners.lock().unwrap();
            // Re-check under the lock: another acquire() may have bumped
            // the count back up between our fetch_sub and taking the lock.
            if listener.refcount.load(Ordering::Acquire) == 0 {
                listeners.remove(&listener.key);
                tracing::debug!(port = listener.key.port, "listener torn down");
            }
        }
    }
}

fn bind_socket(bind_addr: Ipv4Addr, port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    let addr: SocketAddr = (bind_addr, port).into();
    socket
        .bind(&addr.into())
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| Error::BindFailed(e.to_string()))?;
    UdpSocket::from_std(socket.into()).map_err(|e| Error::BindFailed(e.to_string()))
}
