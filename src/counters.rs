//! Observable per-endpoint counters. A plain atomic counter stands in for
//! the real per-CPU counter array a kernel datapath would use; per-CPU
//! fanout is out of scope here.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($field:ident),+ $(,)?) => {
        /// Monotonic per-endpoint counters.
        #[derive(Debug, Default)]
        pub struct Counters {
            $(pub $field: AtomicU64,)+
        }

        impl Counters {
            $(
                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )+
        }
    };
}

counters! {
    rx_packets,
    rx_bytes,
    tx_packets,
    tx_bytes,
    rx_frame_errors,
    rx_dropped,
    tx_dropped,
    tx_errors,
    tx_carrier_errors,
    tx_aborted_errors,
    collisions,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rx(&self, bytes: u64) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_tx(&self, bytes: u64) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
