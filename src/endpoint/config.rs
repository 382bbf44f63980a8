//! `EndpointConfig`: the attribute set an endpoint is created from,
//! mirroring a real VXLAN netlink link's attribute set field for field.

use std::net::Ipv4Addr;

/// IANA-assigned default VXLAN UDP destination port.
pub const DEFAULT_DST_PORT: u16 = 4789;
/// Default ageing interval in seconds.
pub const DEFAULT_AGE_INTERVAL_SEC: u32 = 300;
/// Typical Linux ephemeral port range, used as the default `src_port_range`.
pub const DEFAULT_SRC_PORT_RANGE: (u16, u16) = (32768, 60999);

/// Endpoint behaviour flags.
pub mod flag {
    pub const LEARN: u16 = 1 << 0;
    pub const PROXY: u16 = 1 << 1;
    pub const RSC: u16 = 1 << 2;
    pub const L2MISS: u16 = 1 << 3;
    pub const L3MISS: u16 = 1 << 4;
}

/// Per-frame transmit metadata mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataMode {
    /// Use the endpoint's FDB to pick destinations.
    #[default]
    UseFdb,
    /// Every transmit must supply an explicit [`crate::fdb::Destination`],
    /// as if the bridge framework attached per-frame tunnel metadata.
    Explicit,
}

/// The full attribute set of one VXLAN endpoint.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub vni: u32,
    pub default_remote: Option<Ipv4Addr>,
    pub local_source_ip: Option<Ipv4Addr>,
    pub link: Option<u32>,
    pub dst_port: u16,
    pub ttl: u8,
    /// `1` means inherit the inner IP's DSCP; any other value is written
    /// verbatim. The overload is on `1`, not `0`, matching the real VXLAN
    /// driver's `tos` attribute encoding.
    pub tos: u8,
    pub flags: u16,
    pub age_interval_sec: u32,
    pub fdb_max_entries: u32,
    pub src_port_range: (u16, u16),
    /// Outer UDP checksum enabled. Disabled (checksum 0) by default.
    pub udp_csum: bool,
    /// When `ttl == 0`, inherit TTL from the inner IP packet instead of the
    /// multicast/route-metric rule.
    pub ttl_inherit: bool,
    pub metadata_mode: MetadataMode,
    /// Gates the rate-limited `tracing::warn!` on an illegal outer-CE/
    /// inner-not-ECT combination. On by default, matching the real driver.
    pub log_ecn_error: bool,
}

impl EndpointConfig {
    /// `tos == 1` is the inherit-inner-DSCP sentinel (see the field's doc).
    pub fn effective_tos(&self, inner_dscp: u8) -> u8 {
        if self.tos == 1 {
            inner_dscp
        } else {
            self.tos
        }
    }

    pub fn has_flag(&self, bit: u16) -> bool {
        self.flags & bit != 0
    }
}

/// Builds an [`EndpointConfig`], defaulting every attribute the same way a
/// real VXLAN link would (`LEARNING` on, `AGEING` 300s, port 4789, etc.).
#[derive(Debug, Clone)]
pub struct EndpointConfigBuilder {
    vni: u32,
    default_remote: Option<Ipv4Addr>,
    local_source_ip: Option<Ipv4Addr>,
    link: Option<u32>,
    dst_port: u16,
    ttl: u8,
    tos: u8,
    flags: u16,
    age_interval_sec: u32,
    fdb_max_entries: u32,
    src_port_range: (u16, u16),
    udp_csum: bool,
    ttl_inherit: bool,
    metadata_mode: MetadataMode,
    log_ecn_error: bool,
}

impl EndpointConfigBuilder {
    pub fn new(vni: u32) -> Self {
        Self {
            vni,
            default_remote: None,
            local_source_ip: None,
            link: None,
            dst_port: DEFAULT_DST_PORT,
            ttl: 0,
            tos: 0,
            flags: flag::LEARN,
            age_interval_sec: DEFAULT_AGE_INTERVAL_SEC,
            fdb_max_entries: 0,
            src_port_range: DEFAULT_SRC_PORT_RANGE,
            udp_csum: false,
            ttl_inherit: false,
            metadata_mode: MetadataMode::UseFdb,
            log_ecn_error: true,
        }
    }

    pub fn default_remote(mut self, ip: Ipv4Addr) -> Self {
        self.default_remote = Some(ip);
        self
    }

    pub fn local_source_ip(mut self, ip: Ipv4Addr) -> Self {
        self.local_source_ip = Some(ip);
        self
    }

    pub fn link(mut self, ifindex: u32) -> Self {
        self.link = Some(ifindex);
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    pub fn age_interval_sec(mut self, secs: u32) -> Self {
        self.age_interval_sec = secs;
        self
    }

    pub fn fdb_max_entries(mut self, max: u32) -> Self {
        self.fdb_max_entries = max;
        self
    }

    pub fn src_port_range(mut self, lo: u16, hi: u16) -> Self {
        self.src_port_range = (lo, hi);
        self
    }

    pub fn udp_csum(mut self, enabled: bool) -> Self {
        self.udp_csum = enabled;
        self
    }

    pub fn ttl_inherit(mut self, enabled: bool) -> Self {
        self.ttl_inherit = enabled;
        self
    }

    pub fn log_ecn_error(mut self, enabled: bool) -> Self {
        self.log_ecn_error = enabled;
        self
    }

    pub fn collect_metadata(mut self, enabled: bool) -> Self {
        self.metadata_mode = if enabled {
            MetadataMode::Explicit
        } else {
            MetadataMode::UseFdb
        };
        self
    }

    fn set_flag(mut self, bit: u16, enabled: bool) -> Self {
        if enabled {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
        self
    }

    pub fn learning(self, enabled: bool) -> Self {
        self.set_flag(flag::LEARN, enabled)
    }

    pub fn proxy(self, enabled: bool) -> Self {
        self.set_flag(flag::PROXY, enabled)
    }

    pub fn route_short_circuit(self, enabled: bool) -> Self {
        self.set_flag(flag::RSC, enabled)
    }

    pub fn l2miss(self, enabled: bool) -> Self {
        self.set_flag(flag::L2MISS, enabled)
    }

    pub fn l3miss(self, enabled: bool) -> Self {
        self.set_flag(flag::L3MISS, enabled)
    }

    pub fn build(self) -> EndpointConfig {
        EndpointConfig {
            vni: self.vni,
            default_remote: self.default_remote,
            local_source_ip: self.local_source_ip,
            link: self.link,
            dst_port: self.dst_port,
            ttl: self.ttl,
            tos: self.tos,
            flags: self.flags,
            age_interval_sec: self.age_interval_sec,
            fdb_max_entries: self.fdb_max_entries,
            src_port_range: self.src_port_range,
            udp_csum: self.udp_csum,
            ttl_inherit: self.ttl_inherit,
            metadata_mode: self.metadata_mode,
            log_ecn_error: self.log_ecn_error,
        }
    }
}
