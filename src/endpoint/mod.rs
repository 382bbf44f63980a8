//! The endpoint type, its configuration builder, and its lifecycle state
//! machine.

mod config;
mod lifecycle;

pub use config::{flag, EndpointConfig, EndpointConfigBuilder, MetadataMode};
pub use lifecycle::EndpointState;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::fdb::FdbTable;
use crate::neigh::NeighTable;
use crate::route::RouteTable;
use crate::socket::Listener;
use crate::{counters::Counters, util::mac::Mac};

/// Up to this many `log_ecn_error` warnings are emitted per
/// [`ECN_LOG_INTERVAL_SEC`]-second window; the rest are silently dropped.
const ECN_LOG_BURST: u64 = 5;
const ECN_LOG_INTERVAL_SEC: u64 = 10;

/// A virtual L2 interface bound to exactly one VNI on exactly one UDP
/// listener.
pub struct Endpoint {
    pub config: EndpointConfig,
    /// This endpoint's own MAC, used for receive-path loop suppression
    ///.
    pub mac: Mac,
    pub fdb: FdbTable,
    pub counters: Counters,
    pub route_table: Arc<dyn RouteTable>,
    pub neigh_table: Arc<dyn NeighTable>,

    pub(crate) state: Mutex<EndpointState>,
    pub(crate) listener: Mutex<Option<Arc<Listener>>>,
    ageing_handle: Mutex<Option<JoinHandle<()>>>,
    /// Epoch for [`Endpoint::now_ms`]: every FDB timestamp this endpoint
    /// produces is milliseconds elapsed since the endpoint was constructed.
    epoch: Instant,
    /// Rate-limits the `log_ecn_error` warning on illegal ECN combinations.
    pub(crate) ecn_log_limiter: crate::util::rate::RateLimiter,
}

impl Endpoint {
    pub fn new(
        config: EndpointConfig,
        mac: Mac,
        route_table: Arc<dyn RouteTable>,
        neigh_table: Arc<dyn NeighTable>,
    ) -> Arc<Self> {
        let fdb = FdbTable::new(config.fdb_max_entries as usize);
        Arc::new(Self {
            config,
            mac,
            fdb,
            counters: Counters::new(),
            route_table,
            neigh_table,
            state: Mutex::new(EndpointState::Init),
            listener: Mutex::new(None),
            ageing_handle: Mutex::new(None),
            epoch: Instant::now(),
            ecn_log_limiter: crate::util::rate::RateLimiter::new(
                ECN_LOG_BURST,
                std::time::Duration::from_secs(ECN_LOG_INTERVAL_SEC),
            ),
        })
    }

    pub fn state(&self) -> EndpointState {
        *self.state.lock().unwrap()
    }

    pub fn vni(&self) -> u32 {
        self.config.vni
    }

    pub(crate) fn set_ageing_handle(&self, handle: Option<JoinHandle<()>>) {
        *self.ageing_handle.lock().unwrap() = handle;
    }

    pub(crate) fn take_ageing_handle(&self) -> Option<JoinHandle<()>> {
        self.ageing_handle.lock().unwrap().take()
    }

    pub(crate) fn listener(&self) -> Option<Arc<Listener>> {
        self.listener.lock().unwrap().clone()
    }
}
