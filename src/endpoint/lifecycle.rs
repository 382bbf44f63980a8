//! The endpoint lifecycle state machine: `INIT → READY → UP →
//! READY → DEAD`.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::socket::SocketRegistry;

/// Where an [`Endpoint`] sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Init,
    Ready,
    Up,
    Dead,
}

impl Endpoint {
    /// `INIT → READY`: bind (or join) the shared listener for this
    /// endpoint's port, register its VNI, and install the default-remote
    /// FDB entry if configured.
    #[tracing::instrument(skip(self, registry))]
    pub async fn create(
        self: &Arc<Self>,
        registry: &SocketRegistry,
        namespace: u64,
        bind_addr: Ipv4Addr,
    ) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != EndpointState::Init {
                return Err(Error::InvalidArgument(
                    "endpoint is not in INIT state".into(),
                ));
            }
        }

        let listener = registry
            .acquire(namespace, bind_addr, self.config.dst_port)
            .await?;
        listener.register_vni(self.config.vni, self);
        *self.listener.lock().unwrap() = Some(listener);

        if let Some(ip) = self.config.default_remote {
            self.fdb.install_default(ip, self.now_ms());
        }

        *self.state.lock().unwrap() = EndpointState::Ready;
        tracing::debug!(vni = self.config.vni, "endpoint ready");
        Ok(())
    }

    /// `READY → UP`: join the default-remote multicast group (if any and if
    /// not already joined by another endpoint on this listener), and arm
    /// the ageing timer.
    #[tracing::instrument(skip(self))]
    pub async fn open(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EndpointState::Ready {
                return Err(Error::InvalidArgument("endpoint is not READY".into()));
            }
            *state = EndpointState::Up;
        }

        if let Some(ip) = self.config.default_remote {
            if ip.is_multicast() {
                if let Some(listener) = self.listener() {
                    listener.join_multicast(ip)?;
                }
            }
        }

        self.arm_ageing_timer();
        tracing::debug!(vni = self.config.vni, "endpoint up");
        Ok(())
    }

    /// `UP → READY`: leave the multicast group if this was the last user,
    /// cancel the ageing timer, and flush the FDB (keeping the default
    /// entry,).
    #[tracing::instrument(skip(self))]
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EndpointState::Up {
                return Err(Error::InvalidArgument("endpoint is not UP".into()));
            }
            *state = EndpointState::Ready;
        }

        if let Some(ip) = self.config.default_remote {
            if ip.is_multicast() {
                if let Some(listener) = self.listener() {
                    listener.leave_multicast(ip)?;
                }
            }
        }

        self.cancel_ageing_timer().await;
        self.fdb.flush(true);
        tracing::debug!(vni = self.config.vni, "endpoint closed");
        Ok(())
    }

    /// `READY → DEAD`: unregister from the listener's VNI table, release
    /// the listener reference (may trigger async socket teardown), and
    /// flush every FDB entry including the default.
    #[tracing::instrument(skip(self, registry))]
    pub async fn destroy(self: &Arc<Self>, registry: &SocketRegistry) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != EndpointState::Ready {
                return Err(Error::InvalidArgument("endpoint is not READY".into()));
            }
            *state = EndpointState::Dead;
        }

        self.cancel_ageing_timer().await;

        if let Some(listener) = self.listener.lock().unwrap().take() {
            listener.unregister_vni(self.config.vni);
            registry.release(&listener);
        }

        self.fdb.flush(false);
        tracing::debug!(vni = self.config.vni, "endpoint destroyed");
        Ok(())
    }

    /// Current time, in the same millisecond epoch the FDB's
    /// `last_used_ms`/`last_updated_ms` fields use: milliseconds elapsed
    /// since this endpoint was constructed. Real wall-clock-derived (via
    /// `Instant`, so it is monotonic and immune to clock adjustments), not a
    /// simulated clock, so ageing reflects actual elapsed time.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn arm_ageing_timer(self: &Arc<Self>) {
        if self.config.age_interval_sec == 0 {
            return;
        }
        let endpoint = self.clone();
        let interval = Duration::from_secs(self.config.age_interval_sec as u64);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let now = endpoint.now_ms();
                let _next_expiry = endpoint
                    .fdb
                    .age(now, endpoint.config.age_interval_sec as u64);
                tracing::trace!(vni = endpoint.config.vni, "fdb aged");
            }
        });
        self.set_ageing_handle(Some(handle));
    }

    async fn cancel_ageing_timer(&self) {
        if let Some(handle) = self.take_ageing_handle() {
            handle.abort();
            let _ = handle.await;
        }
    }
}
