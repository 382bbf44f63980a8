//! The forwarding database: a fixed-size, RCU-style hashed table of
//! [`FdbEntry`] keyed by MAC.
//!
//! Each bucket is an [`ArcSwap`] over an immutable `Vec<Arc<FdbEntry>>`.
//! Readers call [`FdbTable::lookup`], which loads the bucket's current
//! `Arc` and returns a cloned `Arc<FdbEntry>` without ever taking a lock;
//! the loaded `Arc` keeps the bucket snapshot (and every entry in it) alive
//! for as long as the reader holds it, which is the deferred-reclamation
//! mechanism that lets lookups stay lock-free. Writers serialise through
//! `write_lock` and publish a new bucket `Vec` built by cloning the old one
//! with the touched entry replaced, the same copy-on-write discipline used
//! elsewhere in this crate for attribute-list-shaped state, adapted here to
//! the packet-path concurrency requirement instead of a single-threaded
//! control path.

use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::error::{Error, Result};
use crate::fdb::entry::{flags, opt, Destination, FdbEntry, FdbNotification, FdbRecord, FdbState};
use crate::util::hash::{fdb_bucket_index, FDB_BUCKET_COUNT};
use crate::util::mac::Mac;

type Bucket = ArcSwap<Vec<Arc<FdbEntry>>>;

pub struct FdbTable {
    buckets: Vec<Bucket>,
    /// 0 means unlimited.
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl FdbTable {
    pub fn new(max_entries: usize) -> Self {
        let mut buckets = Vec::with_capacity(FDB_BUCKET_COUNT);
        for _ in 0..FDB_BUCKET_COUNT {
            buckets.push(ArcSwap::from_pointee(Vec::new()));
        }
        Self {
            buckets,
            max_entries,
            write_lock: Mutex::new(()),
        }
    }

    fn bucket(&self, mac: Mac) -> &Bucket {
        &self.buckets[fdb_bucket_index(mac) as usize]
    }

    /// Lock-free read. Updates `last_used_ms` via a relaxed atomic store.
    pub fn lookup(&self, mac: Mac, now_ms: u64) -> Option<Arc<FdbEntry>> {
        let snapshot = self.bucket(mac).load();
        let entry = snapshot.iter().find(|e| e.mac == mac)?.clone();
        entry.mark_used(now_ms);
        Some(entry)
    }

    /// Total number of distinct MACs currently present. Walks
    /// every bucket; this is an administrative-path operation, not called
    /// from the packet hot path.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.load().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create or update an entry.
    pub fn create_or_update(
        &self,
        mac: Mac,
        dst: Destination,
        state: FdbState,
        entry_flags: u8,
        opts: u8,
        now_ms: u64,
    ) -> Result<FdbNotification> {
        let _guard = self.write_lock.lock().unwrap();
        let bucket = self.bucket(mac);
        let current = bucket.load();

        match current.iter().position(|e| e.mac == mac) {
            None => {
                if opts & opt::CREATE == 0 {
                    return Err(Error::NotFound(format!("fdb entry for {mac}")));
                }
                if self.max_entries > 0 && self.len() >= self.max_entries {
                    return Err(Error::Capacity(format!(
                        "fdb at max_entries={}",
                        self.max_entries
                    )));
                }
                let entry = Arc::new(FdbEntry::new(mac, state, entry_flags, vec![dst], now_ms));
                let mut next: Vec<Arc<FdbEntry>> = (**current).clone();
                next.push(entry);
                bucket.store(Arc::new(next));
                Ok(FdbNotification::NewNeigh {
                    mac,
                    state,
                    flags: entry_flags,
                })
            }
            Some(idx) => {
                if opts & opt::EXCL != 0 {
                    return Err(Error::AlreadyExists(format!("fdb entry for {mac}")));
                }
                let existing = &current[idx];
                let new_remotes = if mac.is_unicast() {
                    // Invariant 1: a unicast MAC holds exactly one
                    // destination; replace-only semantics.
                    if opts & opt::APPEND != 0 {
                        return Err(Error::Unsupported(
                            "APPEND is not valid on a unicast MAC entry".into(),
                        ));
                    }
                    vec![dst]
                } else {
                    // Multicast or the all-zero default: an ordered,
                    // deduplicated flood list.
                    if opts & opt::REPLACE != 0 {
                        return Err(Error::Unsupported(
                            "REPLACE is not valid on a multicast/default MAC entry".into(),
                        ));
                    }
                    if existing.remotes.contains(&dst) {
                        existing.remotes.clone()
                    } else {
                        let mut remotes = existing.remotes.clone();
                        remotes.push(dst);
                        remotes
                    }
                };

                let updated = Arc::new(existing.clone_with(state, entry_flags, new_remotes, now_ms));
                let mut next: Vec<Arc<FdbEntry>> = (**current).clone();
                next[idx] = updated;
                bucket.store(Arc::new(next));
                Ok(FdbNotification::NewNeigh {
                    mac,
                    state,
                    flags: entry_flags,
                })
            }
        }
    }

    /// Delete a destination, or a whole entry.
    ///
    /// Returns `Some(DelNeigh)` when the whole entry was removed, `None`
    /// when only one destination of a multi-destination entry was removed
    /// (no `DELNEIGH` is published for a partial removal).
    pub fn delete(&self, mac: Mac, filter: Option<Destination>) -> Result<Option<FdbNotification>> {
        let _guard = self.write_lock.lock().unwrap();
        let bucket = self.bucket(mac);
        let current = bucket.load();
        let idx = current
            .iter()
            .position(|e| e.mac == mac)
            .ok_or_else(|| Error::NotFound(format!("fdb entry for {mac}")))?;
        let existing = &current[idx];

        let remove_whole = match filter {
            Some(dst) if existing.remotes.len() >= 2 => {
                if !existing.remotes.contains(&dst) {
                    return Err(Error::NotFound(format!("destination {dst:?} on {mac}")));
                }
                false
            }
            _ => true,
        };

        let mut next: Vec<Arc<FdbEntry>> = (**current).clone();
        if remove_whole {
            next.remove(idx);
            bucket.store(Arc::new(next));
            Ok(Some(FdbNotification::DelNeigh { mac }))
        } else {
            let dst = filter.expect("remove_whole is false only when filter is Some");
            let mut remotes = existing.remotes.clone();
            remotes.retain(|d| *d != dst);
            let updated = Arc::new(existing.clone_with(existing.state, existing.flags, remotes, existing.last_updated_ms));
            next[idx] = updated;
            bucket.store(Arc::new(next));
            Ok(None)
        }
    }

    /// Snapshot every `(entry, destination)` pair, starting at bucket
    /// `start_index`. No stability guarantee across concurrent mutation is
    /// required.
    pub fn dump(&self, start_index: usize) -> Vec<FdbRecord> {
        let mut records = Vec::new();
        for i in 0..self.buckets.len() {
            let idx = (start_index + i) % self.buckets.len();
            let snapshot = self.buckets[idx].load();
            for entry in snapshot.iter() {
                for dst in &entry.remotes {
                    records.push(FdbRecord {
                        mac: entry.mac,
                        destination: *dst,
                        state: entry.state,
                        flags: entry.flags,
                        last_used_ms: entry.last_used_ms(),
                        last_updated_ms: entry.last_updated_ms,
                    });
                }
            }
        }
        records
    }

    /// Age out stale entries. Returns the earliest
    /// future expiry (ms since the same epoch as `now`) among surviving
    /// entries, so the caller can schedule its next tick.
    pub fn age(&self, now_ms: u64, threshold_sec: u64) -> Option<u64> {
        let _guard = self.write_lock.lock().unwrap();
        let threshold_ms = threshold_sec.saturating_mul(1000);
        let mut earliest: Option<u64> = None;

        for bucket in &self.buckets {
            let current = bucket.load();
            let mut changed = false;
            let mut kept = Vec::with_capacity(current.len());
            for entry in current.iter() {
                if entry.is_permanent() {
                    kept.push(entry.clone());
                    continue;
                }
                let last_used = entry.last_used_ms();
                if now_ms.saturating_sub(last_used) >= threshold_ms {
                    changed = true;
                    // dropped: caller-visible as a DELNEIGH in a real
                    // control-plane wiring; this table only reports the
                    // survivor schedule, not a notification stream, since
                    // ageing runs without an observer on the other end in
                    // most deployments.
                } else {
                    let expiry = last_used.saturating_add(threshold_ms);
                    earliest = Some(earliest.map_or(expiry, |e: u64| e.min(expiry)));
                    kept.push(entry.clone());
                }
            }
            if changed {
                bucket.store(Arc::new(kept));
            }
        }
        earliest
    }

    /// Delete every entry, optionally preserving the all-zero-MAC default
    /// entry left alone when an endpoint closes.
    pub fn flush(&self, keep_default: bool) {
        let _guard = self.write_lock.lock().unwrap();
        for bucket in &self.buckets {
            let current = bucket.load();
            if keep_default {
                let kept: Vec<Arc<FdbEntry>> =
                    current.iter().filter(|e| e.mac == Mac::ZERO).cloned().collect();
                if kept.len() != current.len() {
                    bucket.store(Arc::new(kept));
                }
            } else if !current.is_empty() {
                bucket.store(Arc::new(Vec::new()));
            }
        }
    }

    /// Install the default (all-zero-MAC) entry holding `default_remote`,
    /// as done on endpoint create when a `default_remote.ip` is configured
    ///.
    pub fn install_default(&self, remote_ip: std::net::Ipv4Addr, now_ms: u64) {
        let dst = Destination::new(remote_ip);
        let _ = self.create_or_update(
            Mac::ZERO,
            dst,
            FdbState::Permanent,
            flags::SELF,
            opt::CREATE,
            now_ms,
        );
    }
}

impl std::fmt::Debug for FdbTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdbTable")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn mac(last: u8) -> Mac {
        Mac([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    fn dst(octet: u8) -> Destination {
        Destination::new(Ipv4Addr::new(10, 0, 0, octet))
    }

    #[test]
    fn create_requires_create_opt() {
        let table = FdbTable::new(0);
        let err = table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, 0, 0)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn create_then_lookup() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 100)
            .unwrap();
        let entry = table.lookup(mac(1), 200).unwrap();
        assert_eq!(entry.remotes.len(), 1);
        assert_eq!(entry.last_used_ms(), 200);
    }

    #[test]
    fn exclusive_create_fails_on_existing() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        let err = table
            .create_or_update(
                mac(1),
                dst(2),
                FdbState::Reachable,
                0,
                opt::CREATE | opt::EXCL,
                0,
            )
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn replace_vs_append_semantics_scenario_4() {
        let table = FdbTable::new(0);
        let dd = Mac([0xdd, 0xdd, 0xdd, 0xdd, 0xdd, 0x04]);
        table
            .create_or_update(dd, dst(8), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();

        table
            .create_or_update(dd, dst(9), FdbState::Reachable, 0, opt::REPLACE, 0)
            .unwrap();
        let entry = table.lookup(dd, 0).unwrap();
        assert_eq!(entry.remotes, vec![dst(9)]);

        let err = table
            .create_or_update(dd, dst(10), FdbState::Reachable, 0, opt::APPEND, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));

        let multicast = Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
        table
            .create_or_update(multicast, dst(1), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();
        table
            .create_or_update(multicast, dst(2), FdbState::Permanent, 0, opt::APPEND, 0)
            .unwrap();
        table
            .create_or_update(multicast, dst(2), FdbState::Permanent, 0, opt::APPEND, 0)
            .unwrap();
        let entry = table.lookup(multicast, 0).unwrap();
        assert_eq!(entry.remotes, vec![dst(1), dst(2)]);
    }

    #[test]
    fn replace_on_multicast_is_refused() {
        let table = FdbTable::new(0);
        let multicast = Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x02]);
        table
            .create_or_update(multicast, dst(1), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();
        let err = table
            .create_or_update(multicast, dst(2), FdbState::Permanent, 0, opt::REPLACE, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn delete_partial_keeps_entry() {
        let table = FdbTable::new(0);
        let multicast = Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x03]);
        table
            .create_or_update(multicast, dst(1), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();
        table
            .create_or_update(multicast, dst(2), FdbState::Permanent, 0, opt::APPEND, 0)
            .unwrap();

        let notification = table.delete(multicast, Some(dst(1))).unwrap();
        assert!(notification.is_none());
        let entry = table.lookup(multicast, 0).unwrap();
        assert_eq!(entry.remotes, vec![dst(2)]);
    }

    #[test]
    fn delete_last_destination_removes_entry() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        let notification = table.delete(mac(1), None).unwrap();
        assert_eq!(notification, Some(FdbNotification::DelNeigh { mac: mac(1) }));
        assert!(table.lookup(mac(1), 0).is_none());
    }

    #[test]
    fn p1_size_tracks_distinct_macs() {
        let table = FdbTable::new(0);
        for i in 0..20u8 {
            table
                .create_or_update(mac(i), dst(i), FdbState::Reachable, 0, opt::CREATE, 0)
                .unwrap();
        }
        assert_eq!(table.len(), 20);
        for i in 0..10u8 {
            table.delete(mac(i), None).unwrap();
        }
        assert_eq!(table.len(), 10);
    }

    #[test]
    fn p2_remotes_never_empty_while_reachable() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        assert!(!table.lookup(mac(1), 0).unwrap().remotes.is_empty());
        table.delete(mac(1), None).unwrap();
        assert!(table.lookup(mac(1), 0).is_none());
    }

    #[test]
    fn p6_ageing_removes_exactly_stale_non_permanent_entries() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        table
            .create_or_update(mac(2), dst(2), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        table
            .create_or_update(mac(3), dst(3), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();

        // mac(2) refreshed at t=1500ms via a lookup (the "touch" in
        // scenario 6); mac(1) and the permanent mac(3) are left alone.
        table.lookup(mac(2), 1500);

        let next_expiry = table.age(2000, 1);
        assert!(table.lookup(mac(1), 0).is_none());
        assert!(table.lookup(mac(2), 0).is_some());
        assert!(table.lookup(mac(3), 0).is_some());
        assert_eq!(next_expiry, Some(2500));
    }

    #[test]
    fn ageing_never_deletes_permanent_entries() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();
        table.age(1_000_000, 1);
        assert!(table.lookup(mac(1), 0).is_some());
    }

    #[test]
    fn flush_preserves_default_when_requested() {
        let table = FdbTable::new(0);
        table.install_default(Ipv4Addr::new(239, 1, 1, 1), 0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();

        table.flush(true);
        assert!(table.lookup(mac(1), 0).is_none());
        assert!(table.lookup(Mac::ZERO, 0).is_some());

        table.flush(false);
        assert!(table.lookup(Mac::ZERO, 0).is_none());
    }

    #[test]
    fn capacity_limit_rejects_new_entries_when_full() {
        let table = FdbTable::new(1);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        let err = table
            .create_or_update(mac(2), dst(2), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap_err();
        assert!(matches!(err, Error::Capacity(_)));
    }

    #[test]
    fn dump_covers_every_installed_destination() {
        let table = FdbTable::new(0);
        table
            .create_or_update(mac(1), dst(1), FdbState::Reachable, 0, opt::CREATE, 0)
            .unwrap();
        let multicast = Mac([0x01, 0x00, 0x5e, 0x00, 0x00, 0x09]);
        table
            .create_or_update(multicast, dst(2), FdbState::Permanent, 0, opt::CREATE, 0)
            .unwrap();
        table
            .create_or_update(multicast, dst(3), FdbState::Permanent, 0, opt::APPEND, 0)
            .unwrap();

        let records = table.dump(0);
        assert_eq!(records.len(), 3);
    }
}
