// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-image detection result cache
//!
//! Entries are keyed by the backend image id and pinned to the URL they were
//! computed from. Id 0 means "no image" and is never stored.

use crate::taxonomy::FurnitureCategoryCode;
use crate::types::{Hotspot, ProcessedDetections};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 30 minutes
pub const DEFAULT_TTL_MS: f64 = 1_800_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCacheEntry {
    pub image_url: String,
    pub processed_detections: ProcessedDetections,
    pub hotspots: Vec<Hotspot>,
    #[serde(default)]
    pub detected_codes: Option<Vec<FurnitureCategoryCode>>,
    /// Milliseconds on the host clock
    pub updated_at: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionCache {
    ttl_ms: f64,
    #[serde(default)]
    entries: BTreeMap<u64, DetectionCacheEntry>,
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_MS)
    }
}

impl DetectionCache {
    pub fn new(ttl_ms: f64) -> Self {
        Self {
            ttl_ms,
            entries: BTreeMap::new(),
        }
    }

    pub fn ttl_ms(&self) -> f64 {
        self.ttl_ms
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fresh entry for `image_id` computed from `image_url`
    ///
    /// A stale entry or one computed from another URL is evicted.
    pub fn get(
        &mut self,
        image_id: u64,
        image_url: &str,
        now: f64,
    ) -> Option<&DetectionCacheEntry> {
        if image_id == 0 {
            return None;
        }
        let usable = match self.entries.get(&image_id) {
            None => return None,
            Some(entry) => entry.image_url == image_url && !self.is_expired(entry, now),
        };
        if !usable {
            self.entries.remove(&image_id);
            return None;
        }
        self.entries.get(&image_id)
    }

    /// Read-only freshness probe; never evicts
    pub fn is_fresh(&self, image_id: u64, image_url: &str, now: f64) -> bool {
        self.entries
            .get(&image_id)
            .is_some_and(|entry| entry.image_url == image_url && !self.is_expired(entry, now))
    }

    pub fn save(&mut self, image_id: u64, entry: DetectionCacheEntry) {
        if image_id == 0 {
            return;
        }
        self.entries.insert(image_id, entry);
    }

    /// Install an entry supplied by the host (e.g. restored from storage)
    ///
    /// Returns whether it was stored: the URL must match and the entry must be
    /// newer than whatever is cached.
    pub fn prime(&mut self, image_id: u64, image_url: &str, entry: DetectionCacheEntry) -> bool {
        if image_id == 0 || entry.image_url != image_url {
            return false;
        }
        if let Some(current) = self.entries.get(&image_id) {
            if current.image_url == image_url && current.updated_at >= entry.updated_at {
                return false;
            }
        }
        self.entries.insert(image_id, entry);
        true
    }

    pub fn remove(&mut self, image_id: u64) -> Option<DetectionCacheEntry> {
        self.entries.remove(&image_id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every expired entry
    pub fn prune(&mut self, now: f64) {
        let ttl = self.ttl_ms;
        self.entries.retain(|_, entry| now - entry.updated_at <= ttl);
    }

    fn is_expired(&self, entry: &DetectionCacheEntry, now: f64) -> bool {
        now - entry.updated_at > self.ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, Detection};

    const URL: &str = "https://cdn.example.com/renders/42.png";

    fn entry(url: &str, updated_at: f64) -> DetectionCacheEntry {
        let detection = Detection::new(BBox::new(10.0, 10.0, 100.0, 80.0), 0.9, 98);
        DetectionCacheEntry {
            image_url: url.to_string(),
            processed_detections: ProcessedDetections {
                detections: vec![detection.clone()],
                inference_time: 12.0,
            },
            hotspots: vec![Hotspot {
                id: 1,
                detection,
                cx: 60.0,
                cy: 50.0,
                refined_label: None,
                refined_label_en: None,
                final_label: Some("Dining Table".into()),
                confidence: None,
            }],
            detected_codes: Some(vec![FurnitureCategoryCode::DiningTable]),
            updated_at,
        }
    }

    #[test]
    fn test_get_returns_fresh_entry() {
        let mut cache = DetectionCache::new(1000.0);
        cache.save(42, entry(URL, 0.0));
        assert!(cache.get(42, URL, 1000.0).is_some());
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let mut cache = DetectionCache::new(1000.0);
        cache.save(42, entry(URL, 0.0));
        assert!(cache.get(42, URL, 1000.5).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_url_mismatch_is_evicted() {
        let mut cache = DetectionCache::default();
        cache.save(42, entry(URL, 0.0));
        assert!(cache.get(42, "https://cdn.example.com/renders/43.png", 1.0).is_none());
        assert!(cache.get(42, URL, 1.0).is_none());
    }

    #[test]
    fn test_id_zero_is_ignored() {
        let mut cache = DetectionCache::default();
        cache.save(0, entry(URL, 0.0));
        assert!(cache.is_empty());
        assert!(!cache.prime(0, URL, entry(URL, 1.0)));
    }

    #[test]
    fn test_prime_keeps_newest() {
        let mut cache = DetectionCache::default();
        assert!(cache.prime(7, URL, entry(URL, 100.0)));
        assert!(!cache.prime(7, URL, entry(URL, 50.0)));
        assert!(!cache.prime(7, URL, entry("https://other", 500.0)));
        assert!(cache.prime(7, URL, entry(URL, 200.0)));
        assert_eq!(cache.get(7, URL, 210.0).map(|e| e.updated_at), Some(200.0));
    }

    #[test]
    fn test_prune_and_freshness() {
        let mut cache = DetectionCache::new(100.0);
        cache.save(1, entry(URL, 0.0));
        cache.save(2, entry(URL, 90.0));
        assert!(!cache.is_fresh(1, URL, 150.0));
        assert!(cache.is_fresh(2, URL, 150.0));
        cache.prune(150.0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_survives_json_storage() {
        let mut cache = DetectionCache::default();
        cache.save(42, entry(URL, 5.0));
        let json = serde_json::to_string(&cache).unwrap();
        assert!(json.contains("\"detectedCodes\":[\"DINING_TABLE\"]"));
        let restored: DetectionCache = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cache);
    }
}
