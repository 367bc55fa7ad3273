// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stateless pipeline functions exposed to JavaScript
//!
//! Arguments and results are plain JS objects in the camelCase shapes the web
//! app already uses. Configs are passed as JSON strings, like `setConfig`.

use crate::utils::{from_js, from_js_opt, set_js_prop, to_js, BindingError};
use houme_vision::category::{FurnitureCodeQuery, ServerCategory};
use houme_vision::{
    build_detected_code_to_category_id, build_hotspots_pipeline, compute_render_metrics,
    decode_detections, detection_signature, letterbox_tensor, map_hotspots_to_detected_codes,
    project_hotspots, refine_cabinet_detections, resolve_category_id_for_hotspot,
    resolve_furniture_code, select_display_hotspots, to_furniture_category_code, ContainerSize,
    Detection, DisplayRect, FurnitureCategoryCode, Hotspot, ImageMeta, ObjectFit, PipelineConfig,
    ProcessedDetections, RawDetections, RefinementOptions, RenderMetrics,
};
use wasm_bindgen::prelude::*;

fn parse_config(config_json: Option<String>) -> Result<PipelineConfig, JsError> {
    match config_json.as_deref() {
        None | Some("") => Ok(PipelineConfig::default()),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| JsError::new(&BindingError::Config(e).to_string())),
    }
}

/// Refine "Cabinet/shelf" detections into cabinet subtypes
#[wasm_bindgen(js_name = refineCabinetDetections)]
pub fn refine_cabinet_detections_js(
    detections: JsValue,
    image_meta: JsValue,
    options_json: Option<String>,
) -> Result<JsValue, JsError> {
    let detections: Vec<Detection> = from_js(detections, "detections")?;
    let image_meta: Option<ImageMeta> = from_js_opt(image_meta, "imageMeta")?;
    let options: RefinementOptions = match options_json.as_deref() {
        None | Some("") => RefinementOptions::default(),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| JsError::new(&format!("Invalid refinement options JSON: {}", e)))?,
    };
    to_js(&refine_cabinet_detections(&detections, image_meta, &options))
}

/// Run the full detection-to-hotspot pipeline for one image
#[wasm_bindgen(js_name = buildHotspotsPipeline)]
pub fn build_hotspots_pipeline_js(
    image_meta: JsValue,
    inference: JsValue,
    config_json: Option<String>,
) -> Result<JsValue, JsError> {
    let image_meta: ImageMeta = from_js(image_meta, "imageMeta")?;
    let inference: ProcessedDetections = from_js(inference, "inference")?;
    let config = parse_config(config_json)?;
    to_js(&build_hotspots_pipeline(image_meta, &inference, &config))
}

/// Describe how an image of `imageMeta` is drawn in the displayed box
///
/// `fit` is `"cover"` (default) or `"contain"`. Returns `null` until both have a size.
#[wasm_bindgen(js_name = computeRenderMetrics)]
pub fn compute_render_metrics_js(
    image_meta: JsValue,
    display_rect: JsValue,
    fit: Option<String>,
) -> Result<JsValue, JsError> {
    let image_meta: ImageMeta = from_js(image_meta, "imageMeta")?;
    let display: DisplayRect = from_js(display_rect, "displayRect")?;
    let fit: ObjectFit = match fit {
        Some(fit) => from_js(JsValue::from_str(&fit), "fit")?,
        None => ObjectFit::default(),
    };
    to_js(&compute_render_metrics(image_meta, display, fit))
}

/// Project natural-pixel hotspots into container coordinates
#[wasm_bindgen(js_name = projectHotspots)]
pub fn project_hotspots_js(
    hotspots: JsValue,
    render_metrics: JsValue,
    container_size: JsValue,
    mirrored: bool,
) -> Result<JsValue, JsError> {
    let hotspots: Vec<Hotspot> = from_js(hotspots, "hotspots")?;
    let metrics: RenderMetrics = from_js(render_metrics, "renderMetrics")?;
    let container: ContainerSize = from_js(container_size, "containerSize")?;
    to_js(&project_hotspots(&hotspots, &metrics, container, mirrored))
}

/// Category code of a detection, or `null`
#[wasm_bindgen(js_name = resolveFurnitureCode)]
pub fn resolve_furniture_code_js(query: JsValue) -> Result<Option<String>, JsError> {
    let query: FurnitureCodeQuery = from_js(query, "query")?;
    Ok(resolve_furniture_code(&query).map(|code| code.as_str().to_string()))
}

/// Normalize a category string into a known code, or `null`
#[wasm_bindgen(js_name = toFurnitureCategoryCode)]
pub fn to_furniture_category_code_js(raw: &str) -> Option<String> {
    to_furniture_category_code(raw).map(|code| code.as_str().to_string())
}

/// Distinct category codes of the hotspots, in hotspot order
#[wasm_bindgen(js_name = mapHotspotsToDetectedCodes)]
pub fn map_hotspots_to_detected_codes_js(hotspots: JsValue) -> Result<JsValue, JsError> {
    let hotspots: Vec<Hotspot> = from_js(hotspots, "hotspots")?;
    to_js(&map_hotspots_to_detected_codes(&hotspots))
}

#[wasm_bindgen(js_name = detectionSignature)]
pub fn detection_signature_js(codes: JsValue) -> Result<String, JsError> {
    let codes: Vec<FurnitureCategoryCode> = from_js(codes, "codes")?;
    Ok(detection_signature(&codes))
}

/// Server category id a hotspot links to, or `null`
#[wasm_bindgen(js_name = resolveCategoryIdForHotspot)]
pub fn resolve_category_id_for_hotspot_js(
    hotspot: JsValue,
    categories: JsValue,
    detected_codes: JsValue,
) -> Result<Option<f64>, JsError> {
    let hotspot: Hotspot = from_js(hotspot, "hotspot")?;
    let categories: Option<Vec<ServerCategory>> = from_js_opt(categories, "categories")?;
    let detected_codes: Vec<FurnitureCategoryCode> = from_js(detected_codes, "detectedCodes")?;

    let code_to_category =
        build_detected_code_to_category_id(categories.as_deref(), &detected_codes);
    let code = resolve_furniture_code(&FurnitureCodeQuery::from_hotspot(&hotspot));
    Ok(
        resolve_category_id_for_hotspot(&hotspot, code, categories.as_deref(), &code_to_category)
            .map(|id| id as f64),
    )
}

/// Hotspots that link to a server category, each with its code and id
#[wasm_bindgen(js_name = selectDisplayHotspots)]
pub fn select_display_hotspots_js(
    hotspots: JsValue,
    categories: JsValue,
    detected_codes: JsValue,
) -> Result<JsValue, JsError> {
    let hotspots: Vec<Hotspot> = from_js(hotspots, "hotspots")?;
    let categories: Option<Vec<ServerCategory>> = from_js_opt(categories, "categories")?;
    let detected_codes: Vec<FurnitureCategoryCode> = from_js(detected_codes, "detectedCodes")?;
    to_js(&select_display_hotspots(
        &hotspots,
        categories.as_deref(),
        &detected_codes,
    ))
}

/// Decode raw detector tensors into furniture detections (model space)
#[wasm_bindgen(js_name = decodeDetections)]
pub fn decode_detections_js(
    boxes: &[f32],
    scores: &[f32],
    labels: &[i64],
    min_confidence: f64,
) -> Result<JsValue, JsError> {
    let raw = RawDetections {
        boxes: boxes.to_vec(),
        scores: scores.to_vec(),
        labels: labels.to_vec(),
        elapsed_ms: 0.0,
    };
    let detections = decode_detections(&raw, min_confidence)
        .map_err(|e| JsError::new(&BindingError::Pipeline(e).to_string()))?;
    to_js(&detections)
}

/// Letterbox RGBA pixels into a `1x3xSxS` model input
///
/// Returns `{ data: Float32Array, dims: number[], letterbox }`.
#[wasm_bindgen(js_name = letterboxTensor)]
pub fn letterbox_tensor_js(
    rgba_data: &[u8],
    width: u32,
    height: u32,
    input_size: u32,
) -> Result<JsValue, JsError> {
    let expected_len = (width as usize) * (height as usize) * 4;
    if rgba_data.len() != expected_len {
        return Err(JsError::new(&format!(
            "Invalid RGBA data length: expected {}, got {}",
            expected_len,
            rgba_data.len()
        )));
    }

    let tensor = letterbox_tensor(rgba_data, width, height, input_size)
        .map_err(|e| JsError::new(&BindingError::Pipeline(e).to_string()))?;

    let obj = js_sys::Object::new();
    let data = js_sys::Float32Array::new_with_length(tensor.data.len() as u32);
    data.copy_from(&tensor.data);
    set_js_prop(&obj, "data", &data)?;
    set_js_prop(&obj, "dims", &to_js(&tensor.shape())?)?;
    set_js_prop(&obj, "letterbox", &to_js(&tensor.letterbox)?)?;
    Ok(obj.into())
}
