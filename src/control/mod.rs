//! Control-plane message values and their validate/apply behaviour.
//!
//! This crate opens no netlink socket of its own (the transport is out of
//! scope); [`ControlPlane`] is what a caller wiring this engine to a real
//! RPC transport decodes incoming attribute sets into and dispatches
//! through, the way a `MessageBuilder`/`NdMsg` pair decodes real kernel
//! messages for a CLI front-end.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use crate::endpoint::{Endpoint, EndpointConfigBuilder};
use crate::error::{Error, Result};
use crate::fdb::{Destination, FdbNotification, FdbRecord, FdbState};
use crate::neigh::NeighTable;
use crate::route::RouteTable;
use crate::socket::{NamespaceId, SocketRegistry};
use crate::util::mac::Mac;
use crate::wire::VNI_MAX;

/// `CreateEndpoint`'s attribute set.
#[derive(Debug, Clone)]
pub struct CreateEndpoint {
    pub vni: u32,
    pub group: Option<Ipv4Addr>,
    pub link: Option<u32>,
    pub local: Option<Ipv4Addr>,
    pub tos: u8,
    pub ttl: u8,
    pub learning: bool,
    pub ageing: u32,
    pub limit: u32,
    pub proxy: bool,
    pub rsc: bool,
    pub l2miss: bool,
    pub l3miss: bool,
    pub port_range: Option<(u16, u16)>,
    pub port: u16,
}

impl CreateEndpoint {
    /// `ID >= 2^24` is `ERANGE`; `PORT_RANGE.hi < PORT_RANGE.lo` is
    /// `EINVAL`, mapped onto this crate's `Error` kinds.
    pub fn validate(&self) -> Result<()> {
        if self.vni > VNI_MAX {
            return Err(Error::InvalidArgument(format!(
                "VNI {} exceeds 24-bit range",
                self.vni
            )));
        }
        if let Some((lo, hi)) = self.port_range {
            if hi < lo {
                return Err(Error::InvalidArgument(
                    "PORT_RANGE.hi must be >= PORT_RANGE.lo".into(),
                ));
            }
        }
        Ok(())
    }

    fn into_config_builder(self) -> EndpointConfigBuilder {
        let mut builder = EndpointConfigBuilder::new(self.vni)
            .dst_port(self.port)
            .ttl(self.ttl)
            .tos(self.tos)
            .age_interval_sec(self.ageing)
            .fdb_max_entries(self.limit)
            .learning(self.learning)
            .proxy(self.proxy)
            .route_short_circuit(self.rsc)
            .l2miss(self.l2miss)
            .l3miss(self.l3miss);
        if let Some(group) = self.group {
            builder = builder.default_remote(group);
        }
        if let Some(link) = self.link {
            builder = builder.link(link);
        }
        if let Some(local) = self.local {
            builder = builder.local_source_ip(local);
        }
        if let Some((lo, hi)) = self.port_range {
            builder = builder.src_port_range(lo, hi);
        }
        builder
    }
}

/// `DeleteEndpoint`'s key: identified by the `(VNI, PORT)` it was created
/// with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeleteEndpoint {
    pub vni: u32,
    pub port: u16,
}

/// `FdbAdd`.
#[derive(Debug, Clone)]
pub struct FdbAdd {
    pub vni: u32,
    pub port: u16,
    pub mac: Mac,
    pub dst_ip: Ipv4Addr,
    pub dst_port: Option<u16>,
    pub dst_vni: Option<u32>,
    pub dst_ifindex: Option<u32>,
    pub state: FdbState,
    pub opts: u8,
}

impl FdbAdd {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.state, FdbState::Permanent | FdbState::Reachable) {
            return Err(Error::InvalidArgument(
                "fdb add state must be PERMANENT or REACHABLE".into(),
            ));
        }
        Ok(())
    }

    fn destination(&self) -> Destination {
        Destination {
            remote_ip: self.dst_ip,
            remote_port: self.dst_port.unwrap_or(0),
            remote_vni: self.dst_vni.unwrap_or(crate::wire::VNI_INHERIT),
            remote_ifindex: self.dst_ifindex.unwrap_or(0),
        }
    }
}

/// `FdbDel`.
#[derive(Debug, Clone)]
pub struct FdbDel {
    pub vni: u32,
    pub port: u16,
    pub mac: Mac,
    /// A full 4-tuple filter; `None` deletes the whole entry.
    pub filter: Option<Destination>,
}

/// `FdbDump`.
#[derive(Debug, Clone, Copy)]
pub struct FdbDump {
    pub vni: u32,
    pub port: u16,
    pub start_index: usize,
}

/// Owns the socket registry and the set of live endpoints, and dispatches
/// control-plane messages against them: validate, then mutate the FDB/
/// socket/VNI registries under the appropriate locks.
pub struct ControlPlane {
    registry: SocketRegistry,
    namespace: NamespaceId,
    endpoints: Mutex<HashMap<(u32, u16), Arc<Endpoint>>>,
    route_table: Arc<dyn RouteTable>,
    neigh_table: Arc<dyn NeighTable>,
}

impl ControlPlane {
    pub fn new(
        namespace: NamespaceId,
        route_table: Arc<dyn RouteTable>,
        neigh_table: Arc<dyn NeighTable>,
    ) -> Self {
        Self {
            registry: SocketRegistry::new(),
            namespace,
            endpoints: Mutex::new(HashMap::new()),
            route_table,
            neigh_table,
        }
    }

    #[tracing::instrument(skip(self, msg))]
    pub async fn create_endpoint(&self, msg: CreateEndpoint, own_mac: Mac) -> Result<Arc<Endpoint>> {
        msg.validate()?;
        let key = (msg.vni, msg.port);
        {
            let endpoints = self.endpoints.lock().unwrap();
            if endpoints.contains_key(&key) {
                return Err(Error::AlreadyExists(format!(
                    "endpoint for (vni={}, port={})",
                    msg.vni, msg.port
                )));
            }
        }

        let bind_addr = msg.local.unwrap_or(Ipv4Addr::UNSPECIFIED);
        let config = msg.into_config_builder().build();
        let endpoint = Endpoint::new(
            config,
            own_mac,
            self.route_table.clone(),
            self.neigh_table.clone(),
        );
        endpoint
            .create(&self.registry, self.namespace, bind_addr)
            .await?;

        self.endpoints.lock().unwrap().insert(key, endpoint.clone());
        Ok(endpoint)
    }

    pub async fn open_endpoint(&self, key: DeleteEndpoint) -> Result<()> {
        let endpoint = self.get(key)?;
        endpoint.open().await
    }

    pub async fn close_endpoint(&self, key: DeleteEndpoint) -> Result<()> {
        let endpoint = self.get(key)?;
        endpoint.close().await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_endpoint(&self, msg: DeleteEndpoint) -> Result<()> {
        let key = (msg.vni, msg.port);
        let endpoint = {
            let mut endpoints = self.endpoints.lock().unwrap();
            endpoints
                .remove(&key)
                .ok_or_else(|| Error::NotFound(format!("endpoint for {msg:?}")))?
        };
        if endpoint.state() == crate::endpoint::EndpointState::Up {
            endpoint.close().await?;
        }
        endpoint.destroy(&self.registry).await
    }

    pub fn fdb_add(&self, msg: FdbAdd) -> Result<FdbNotification> {
        msg.validate()?;
        let endpoint = self.get(DeleteEndpoint {
            vni: msg.vni,
            port: msg.port,
        })?;
        let dst = msg.destination();
        let now = endpoint.now_ms();
        endpoint
            .fdb
            .create_or_update(msg.mac, dst, msg.state, 0, msg.opts, now)
    }

    pub fn fdb_del(&self, msg: FdbDel) -> Result<Option<FdbNotification>> {
        let endpoint = self.get(DeleteEndpoint {
            vni: msg.vni,
            port: msg.port,
        })?;
        endpoint.fdb.delete(msg.mac, msg.filter)
    }

    pub fn fdb_dump(&self, msg: FdbDump) -> Result<Vec<FdbRecord>> {
        let endpoint = self.get(DeleteEndpoint {
            vni: msg.vni,
            port: msg.port,
        })?;
        Ok(endpoint.fdb.dump(msg.start_index))
    }

    fn get(&self, key: DeleteEndpoint) -> Result<Arc<Endpoint>> {
        self.endpoints
            .lock()
            .unwrap()
            .get(&(key.vni, key.port))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("endpoint for {key:?}")))
    }
}
