//! Concurrency-safe, time-bounded in-memory store of readings
//!
//! The store is written on every received reading, pruned on a slow schedule
//! and read in full only when archiving or rendering. Writers therefore never
//! take a lock: the whole sequence sits behind one atomically swappable
//! reference and every mutation is an optimistic load, copy, compare-and-swap
//! cycle that retries when another writer won the race. Readers load the
//! current reference and never wait.

use arc_swap::ArcSwap;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use crate::models::Reading;

/// Point-in-time copy of the store contents
pub type Snapshot = Vec<Arc<Reading>>;

#[derive(Debug)]
pub struct MeasurementStore {
    data: ArcSwap<Snapshot>,
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasurementStore {
    pub fn new() -> Self {
        MeasurementStore {
            data: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Append one reading. Safe to call from any number of tasks at once.
    pub fn add(&self, reading: Reading) {
        let reading = Arc::new(reading);
        let mut attempts = 0usize;

        loop {
            let current = self.data.load_full();
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&reading));

            let previous = self.data.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*previous, &current) {
                if attempts > 0 {
                    debug!("add committed after {} retries", attempts);
                }
                return;
            }
            attempts += 1;
        }
    }

    /// Independent copy of every reading, in arrival order.
    ///
    /// The copy reflects one committed state: either before or after any
    /// concurrent `add` or prune, never in between.
    pub fn all_snapshot(&self) -> Snapshot {
        self.data.load().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.data.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove readings older than `now - max_age` and readings without a
    /// timestamp. Returns the number removed.
    pub fn prune_older_than(&self, max_age: Duration) -> usize {
        self.prune_older_than_at(max_age, OffsetDateTime::now_utc())
    }

    /// Same as [`prune_older_than`](Self::prune_older_than) with an explicit
    /// reference instant.
    pub fn prune_older_than_at(&self, max_age: Duration, now: OffsetDateTime) -> usize {
        // A max age reaching before the representable range keeps every dated reading.
        let cutoff = time::Duration::try_from(max_age)
            .ok()
            .and_then(|age| now.checked_sub(age));

        loop {
            let current = self.data.load_full();
            let kept: Snapshot = current
                .iter()
                .filter(|r| match (r.timestamp, cutoff) {
                    (None, _) => false,
                    (Some(ts), Some(cutoff)) => ts >= cutoff,
                    (Some(_), None) => true,
                })
                .cloned()
                .collect();

            let removed = current.len() - kept.len();
            if removed == 0 {
                return 0;
            }

            let previous = self.data.compare_and_swap(&current, Arc::new(kept));
            if Arc::ptr_eq(&*previous, &current) {
                return removed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn reading(device: &str, timestamp: Option<OffsetDateTime>) -> Reading {
        Reading {
            device_id: device.to_string(),
            mac_address: format!("{}:00", device.to_lowercase()),
            temperature: 20.0,
            humidity: 50.0,
            pressure: 1000.0,
            battery_volts: 3.0,
            rssi: -60,
            timestamp,
        }
    }

    #[test]
    fn test_add_preserves_arrival_order_without_dedup() {
        let store = MeasurementStore::new();
        let now = OffsetDateTime::now_utc();
        store.add(reading("A", Some(now)));
        store.add(reading("B", Some(now)));
        store.add(reading("A", Some(now)));

        let devices: Vec<_> = store
            .all_snapshot()
            .iter()
            .map(|r| r.device_id.clone())
            .collect();
        assert_eq!(devices, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = MeasurementStore::new();
        store.add(reading("A", Some(OffsetDateTime::now_utc())));

        let mut snapshot = store.all_snapshot();
        snapshot.clear();
        store.add(reading("B", Some(OffsetDateTime::now_utc())));

        assert!(snapshot.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_prune_removes_aged_readings() {
        let store = MeasurementStore::new();
        let now = OffsetDateTime::now_utc();
        store.add(reading("old", Some(now - time::Duration::seconds(5))));
        store.add(reading("new", Some(now)));

        let removed = store.prune_older_than_at(Duration::from_secs(2), now);

        assert_eq!(removed, 1);
        let snapshot = store.all_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].device_id, "new");
    }

    #[test]
    fn test_prune_always_removes_missing_timestamps() {
        let store = MeasurementStore::new();
        store.add(reading("undated", None));
        store.add(reading("dated", Some(OffsetDateTime::now_utc())));

        let removed = store.prune_older_than(Duration::MAX);

        assert_eq!(removed, 1);
        assert!(store.all_snapshot().iter().all(|r| r.timestamp.is_some()));
    }

    #[test]
    fn test_prune_is_idempotent() {
        let store = MeasurementStore::new();
        let now = OffsetDateTime::now_utc();
        for secs in 0..10 {
            store.add(reading("A", Some(now - time::Duration::seconds(secs))));
        }

        let first = store.prune_older_than_at(Duration::from_secs(4), now);
        let second = store.prune_older_than_at(Duration::from_secs(4), now);

        assert_eq!(first, 5);
        assert_eq!(second, 0);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        const WRITERS: usize = 4;
        const ADDS: usize = 1000;

        let store = Arc::new(MeasurementStore::new());
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..ADDS {
                        store.add(reading(&format!("W{w}"), Some(OffsetDateTime::now_utc())));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.len(), WRITERS * ADDS);
        for w in 0..WRITERS {
            let name = format!("W{w}");
            let count = store
                .all_snapshot()
                .iter()
                .filter(|r| r.device_id == name)
                .count();
            assert_eq!(count, ADDS);
        }
    }

    #[test]
    fn test_concurrent_adds_and_prunes() {
        const WRITERS: usize = 2;
        const ADDS: usize = 2000;

        let store = Arc::new(MeasurementStore::new());
        let writers: Vec<_> = (0..WRITERS)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..ADDS {
                        // Every third reading is undated and must never survive a prune.
                        let ts = (i % 3 != 0).then(OffsetDateTime::now_utc);
                        store.add(reading("A", ts));
                    }
                })
            })
            .collect();

        let pruner = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut removed = 0;
                for _ in 0..50 {
                    removed += store.prune_older_than(Duration::from_secs(3600));
                    thread::yield_now();
                }
                removed
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        let mut removed = pruner.join().unwrap();
        removed += store.prune_older_than(Duration::from_secs(3600));

        let undated = (0..ADDS).filter(|i| i % 3 == 0).count() * WRITERS;
        assert_eq!(removed, undated);
        assert_eq!(store.len(), WRITERS * ADDS - undated);
        assert!(store.all_snapshot().iter().all(|r| r.timestamp.is_some()));
    }

    #[test]
    fn test_snapshots_never_shrink_without_prune() {
        let store = Arc::new(MeasurementStore::new());
        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..2000 {
                    store.add(reading("A", Some(OffsetDateTime::now_utc())));
                }
            })
        };

        let mut last = 0;
        while !writer.is_finished() {
            let len = store.all_snapshot().len();
            assert!(len >= last);
            last = len;
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 2000);
    }
}
