//! Per-date writer exclusivity.
//!
//! Readers of finalized dates take no lock. Writers that rebuild a date hold a
//! [`DateGuard`] for it; a second writer for the same date blocks until the
//! first guard drops. Different dates never contend.

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct DateLocks {
    held: Mutex<HashSet<NaiveDate>>,
    released: Condvar,
}

impl DateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `date` is free, then hold it until the guard drops.
    pub fn lock(&self, date: NaiveDate) -> DateGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(&date) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(date);
        DateGuard { locks: self, date }
    }

    /// Take `date` only if no one else holds it.
    pub fn try_lock(&self, date: NaiveDate) -> Option<DateGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if held.insert(date) {
            Some(DateGuard { locks: self, date })
        } else {
            None
        }
    }

    pub fn is_locked(&self, date: NaiveDate) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&date)
    }
}

#[derive(Debug)]
pub struct DateGuard<'a> {
    locks: &'a DateLocks,
    date: NaiveDate,
}

impl DateGuard<'_> {
    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

impl Drop for DateGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.date);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    #[test]
    fn same_date_is_exclusive() {
        let locks = DateLocks::new();
        let guard = locks.lock(d(1));
        assert!(locks.try_lock(d(1)).is_none());
        assert!(locks.try_lock(d(2)).is_some());
        drop(guard);
        assert!(!locks.is_locked(d(1)));
        assert!(locks.try_lock(d(1)).is_some());
    }

    #[test]
    fn writers_of_one_date_never_overlap() {
        let locks = Arc::new(DateLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let _g = locks.lock(d(7));
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
