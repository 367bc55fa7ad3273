// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Browser tests for the stateless bindings

#![cfg(target_arch = "wasm32")]

use houme_wasm::{
    compute_render_metrics_js, detection_signature_js, letterbox_tensor_js,
    to_furniture_category_code_js, version, DetectionCacheJs,
};
use js_sys::{Reflect, JSON};
use wasm_bindgen::JsValue;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

fn json(text: &str) -> JsValue {
    JSON::parse(text).unwrap()
}

fn number(obj: &JsValue, key: &str) -> f64 {
    Reflect::get(obj, &key.into()).unwrap().as_f64().unwrap()
}

#[wasm_bindgen_test]
fn test_version() {
    assert!(!version().is_empty());
}

#[wasm_bindgen_test]
fn test_category_code_normalization() {
    assert_eq!(
        to_furniture_category_code_js(" closet ").as_deref(),
        Some("CLOSET")
    );
    assert_eq!(to_furniture_category_code_js("SOFA"), None);
}

#[wasm_bindgen_test]
fn test_signature_is_sorted() {
    let codes = json(r#"["TWO_SEATER_SOFA", "MIRROR"]"#);
    assert_eq!(detection_signature_js(codes).unwrap(), "MIRROR,TWO_SEATER_SOFA");
}

#[wasm_bindgen_test]
fn test_contain_metrics() {
    let meta = json(r#"{"width": 1536, "height": 1024}"#);
    let display = json(r#"{"left": 0, "top": 0, "width": 800, "height": 512}"#);
    let metrics = compute_render_metrics_js(meta, display, Some("contain".into())).unwrap();
    assert_eq!(number(&metrics, "offsetX"), 16.0);
    assert_eq!(number(&metrics, "offsetY"), 0.0);
    assert_eq!(number(&metrics, "scaleX"), 0.5);
}

#[wasm_bindgen_test]
fn test_metrics_need_a_displayed_box() {
    let meta = json(r#"{"width": 1536, "height": 1024}"#);
    let display = json(r#"{"left": 0, "top": 0, "width": 0, "height": 0}"#);
    let metrics = compute_render_metrics_js(meta, display, None).unwrap();
    assert!(metrics.is_null());
}

#[wasm_bindgen_test]
fn test_letterbox_rejects_short_buffer() {
    assert!(letterbox_tensor_js(&[0u8; 12], 2, 2, 640).is_err());
}

#[wasm_bindgen_test]
fn test_letterbox_tensor_shape() {
    let rgba = vec![255u8; 4 * 4 * 4];
    let result = letterbox_tensor_js(&rgba, 4, 4, 8).unwrap();
    let dims = Reflect::get(&result, &"dims".into()).unwrap();
    assert_eq!(JSON::stringify(&dims).unwrap(), "[1,3,8,8]");
    let data = Reflect::get(&result, &"data".into()).unwrap();
    assert_eq!(number(&data, "length"), (3 * 8 * 8) as f64);
}

#[wasm_bindgen_test]
fn test_cache_starts_empty() {
    let cache = DetectionCacheJs::new(None);
    assert_eq!(cache.size(), 0);
    assert!(cache.get(7, "https://cdn.example/a.png").unwrap().is_null());
}
