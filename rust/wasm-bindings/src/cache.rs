// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Detection result cache exposed to JavaScript

use crate::utils::{from_js, to_js, BindingError};
use houme_vision::host::Timer;
use houme_vision::{DetectionCache, DetectionCacheEntry};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

use crate::browser::BrowserTimer;

/// Per-image detection cache, keyed by image id
///
/// Example:
/// ```javascript
/// const cache = new DetectionCache(30 * 60 * 1000);
/// cache.save(imageId, { imageUrl, processedDetections, hotspots, updatedAt: Date.now() });
/// sessionStorage.setItem('detections', cache.toJson());
/// ```
#[wasm_bindgen(js_name = DetectionCache)]
pub struct DetectionCacheJs {
    inner: Rc<RefCell<DetectionCache>>,
}

impl DetectionCacheJs {
    pub(crate) fn shared(&self) -> Rc<RefCell<DetectionCache>> {
        Rc::clone(&self.inner)
    }

    pub(crate) fn from_shared(inner: Rc<RefCell<DetectionCache>>) -> Self {
        Self { inner }
    }
}

#[wasm_bindgen(js_class = DetectionCache)]
impl DetectionCacheJs {
    #[wasm_bindgen(constructor)]
    pub fn new(ttl_ms: Option<f64>) -> Self {
        let cache = ttl_ms.map(DetectionCache::new).unwrap_or_default();
        Self::from_shared(Rc::new(RefCell::new(cache)))
    }

    /// Restore a cache serialized with `toJson`
    #[wasm_bindgen(js_name = fromJson)]
    pub fn from_json(json: &str) -> Result<DetectionCacheJs, JsError> {
        let cache: DetectionCache = serde_json::from_str(json)
            .map_err(|e| JsError::new(&BindingError::Config(e).to_string()))?;
        Ok(Self::from_shared(Rc::new(RefCell::new(cache))))
    }

    #[wasm_bindgen(js_name = toJson)]
    pub fn to_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&*self.inner.borrow())
            .map_err(|e| JsError::new(&format!("Serialization error: {}", e)))
    }

    /// Fresh entry for the image, or `null`; stale or mismatched entries are evicted
    #[wasm_bindgen]
    pub fn get(&self, image_id: u64, image_url: &str) -> Result<JsValue, JsError> {
        let now = BrowserTimer.now_ms();
        let mut cache = self.inner.borrow_mut();
        match cache.get(image_id, image_url, now) {
            Some(entry) => to_js(entry),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen]
    pub fn save(&self, image_id: u64, entry: JsValue) -> Result<(), JsError> {
        let entry: DetectionCacheEntry = from_js(entry, "entry")?;
        self.inner.borrow_mut().save(image_id, entry);
        Ok(())
    }

    /// Install an externally supplied entry if it is newer; returns whether it was stored
    #[wasm_bindgen]
    pub fn prime(&self, image_id: u64, image_url: &str, entry: JsValue) -> Result<bool, JsError> {
        let entry: DetectionCacheEntry = from_js(entry, "entry")?;
        Ok(self.inner.borrow_mut().prime(image_id, image_url, entry))
    }

    #[wasm_bindgen]
    pub fn remove(&self, image_id: u64) {
        self.inner.borrow_mut().remove(image_id);
    }

    #[wasm_bindgen]
    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    #[wasm_bindgen(getter)]
    pub fn size(&self) -> usize {
        self.inner.borrow().len()
    }
}
