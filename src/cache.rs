use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::SheetError;
use crate::model::Barcode;
use crate::sheets::SheetStore;

/// Barcodes already present in column 1 of the sheet.
///
/// Seeded once at startup and only ever grown. A scan of an unknown barcode
/// takes the per-barcode guard from [`DedupCache::lock`] for the whole
/// lookup and append, so two concurrent scans of the same barcode produce a
/// single row.
#[derive(Default)]
pub struct DedupCache {
    known: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, Slot>>,
}

/// Lock for one barcode plus the number of scans holding or waiting on it.
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

/// Counts one user of a slot; the last one out removes it. Also dropped
/// when a scan is cancelled while still waiting for the lock.
struct Registration<'a> {
    cache: &'a DedupCache,
    key: String,
}

pub struct BarcodeGuard<'a> {
    // fields drop in order: unlock first, then deregister
    _lock: OwnedMutexGuard<()>,
    _registration: Registration<'a>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded<I, S>(barcodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known = barcodes
            .into_iter()
            .map(Into::into)
            .map(|b: String| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();

        DedupCache {
            known: Mutex::new(known),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Reads column 1 of the sheet, skipping the first `header_rows` values.
    pub async fn load(store: &dyn SheetStore, header_rows: usize) -> Result<Self, SheetError> {
        let column = store.column_values().await?;
        Ok(Self::seeded(column.into_iter().skip(header_rows)))
    }

    pub fn contains(&self, barcode: &Barcode) -> bool {
        self.known().contains(barcode.as_str())
    }

    /// Records a barcode. Call only once its row has been appended.
    pub fn insert(&self, barcode: &Barcode) {
        self.known().insert(barcode.to_string());
    }

    pub fn len(&self) -> usize {
        self.known().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until no other scan holds this barcode, then holds it until the
    /// returned guard is dropped.
    pub async fn lock(&self, barcode: &Barcode) -> BarcodeGuard<'_> {
        let (registration, lock) = {
            let mut in_flight = self.in_flight();
            let slot = in_flight.entry(barcode.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            let registration = Registration {
                cache: self,
                key: barcode.to_string(),
            };
            (registration, slot.lock.clone())
        };

        let lock = lock.lock_owned().await;
        BarcodeGuard {
            _lock: lock,
            _registration: registration,
        }
    }

    fn known(&self) -> MutexGuard<'_, HashSet<String>> {
        // the set is never left half-updated, so a poisoned lock is still usable
        self.known.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.in_flight().len()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight();
        if let Some(slot) = in_flight.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                in_flight.remove(&self.key);
            }
        }
    }
}
