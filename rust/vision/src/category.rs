// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolution of hotspots into purchasable categories
//!
//! A hotspot first resolves to a [`FurnitureCategoryCode`]. The code is then
//! matched against the categories the backend returned for the current image,
//! which arrive in the same order as the de-duplicated detected codes that were
//! sent.

use crate::taxonomy::{
    codes_for_final_label, codes_for_index, is_cabinet_shelf_index, CabinetSubtype,
    FurnitureCategoryCode,
};
use crate::types::Hotspot;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Signals available for resolving one detection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FurnitureCodeQuery {
    #[serde(default)]
    pub final_label: Option<String>,
    /// Zero-based class index
    #[serde(default)]
    pub obj365_label: Option<usize>,
    #[serde(default)]
    pub refined_label: Option<CabinetSubtype>,
    #[serde(default)]
    pub refined_confidence: Option<f64>,
}

impl FurnitureCodeQuery {
    pub fn from_hotspot(hotspot: &Hotspot) -> Self {
        Self {
            final_label: hotspot.final_label.clone(),
            obj365_label: Some(hotspot.detection.label),
            refined_label: hotspot.refined_label,
            refined_confidence: hotspot.confidence,
        }
    }
}

/// Resolve a detection into a single category code
///
/// An unrefined cabinet never resolves. Otherwise the refined subtype wins,
/// then the final text label, then the raw class index.
pub fn resolve_furniture_code(query: &FurnitureCodeQuery) -> Option<FurnitureCategoryCode> {
    let is_cabinet = query.obj365_label.is_some_and(is_cabinet_shelf_index);
    if is_cabinet && query.refined_label.is_none() {
        return None;
    }

    if let Some(code) = query.refined_label.and_then(CabinetSubtype::category_code) {
        return Some(code);
    }

    if let Some(code) = query
        .final_label
        .as_deref()
        .and_then(|label| codes_for_final_label(label).first())
    {
        return Some(*code);
    }

    query
        .obj365_label
        .and_then(|idx| codes_for_index(idx).first().copied())
}

/// Zero-or-one element form of [`resolve_furniture_code`]
pub fn resolve_furniture_codes(query: &FurnitureCodeQuery) -> Vec<FurnitureCategoryCode> {
    resolve_furniture_code(query).into_iter().collect()
}

/// De-duplicate codes keeping first occurrences
pub fn filter_allowed_codes<I>(codes: I) -> Vec<FurnitureCategoryCode>
where
    I: IntoIterator<Item = FurnitureCategoryCode>,
{
    let mut seen = FxHashSet::default();
    codes.into_iter().filter(|code| seen.insert(*code)).collect()
}

/// One category returned by the backend for an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCategory {
    pub id: i64,
    pub category_name: String,
}

/// Pair detected codes with server categories by position
///
/// The backend answers in the order the codes were sent, so the n-th distinct
/// code owns the n-th category. Surplus entries on either side stay unpaired.
pub fn build_detected_code_to_category_id(
    categories: Option<&[ServerCategory]>,
    detected_codes: &[FurnitureCategoryCode],
) -> FxHashMap<FurnitureCategoryCode, i64> {
    let Some(categories) = categories else {
        return FxHashMap::default();
    };
    filter_allowed_codes(detected_codes.iter().copied())
        .into_iter()
        .zip(categories)
        .map(|(code, category)| (code, category.id))
        .collect()
}

/// Category id a hotspot links to, if the backend allowed its code
pub fn resolve_category_id_for_hotspot(
    hotspot: &Hotspot,
    code: Option<FurnitureCategoryCode>,
    categories: Option<&[ServerCategory]>,
    code_to_category: &FxHashMap<FurnitureCategoryCode, i64>,
) -> Option<i64> {
    if categories.map_or(true, <[ServerCategory]>::is_empty) {
        return None;
    }
    if is_cabinet_shelf_index(hotspot.detection.label) && hotspot.refined_label.is_none() {
        return None;
    }
    code.and_then(|code| code_to_category.get(&code).copied())
}

/// Distinct codes of every hotspot, in hotspot order
pub fn map_hotspots_to_detected_codes(hotspots: &[Hotspot]) -> Vec<FurnitureCategoryCode> {
    filter_allowed_codes(
        hotspots
            .iter()
            .filter_map(|h| resolve_furniture_code(&FurnitureCodeQuery::from_hotspot(h))),
    )
}

/// Order-independent key of a detected code set
pub fn detection_signature(codes: &[FurnitureCategoryCode]) -> String {
    let mut names: Vec<&str> = filter_allowed_codes(codes.iter().copied())
        .into_iter()
        .map(FurnitureCategoryCode::as_str)
        .collect();
    names.sort_unstable();
    names.join(",")
}

/// A hotspot that links to a server category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayHotspot {
    pub hotspot: Hotspot,
    pub code: FurnitureCategoryCode,
    pub category_id: i64,
}

/// Keep only hotspots that resolve to an allowed category
pub fn select_display_hotspots(
    hotspots: &[Hotspot],
    categories: Option<&[ServerCategory]>,
    detected_codes: &[FurnitureCategoryCode],
) -> Vec<DisplayHotspot> {
    let code_to_category = build_detected_code_to_category_id(categories, detected_codes);
    hotspots
        .iter()
        .filter_map(|hotspot| {
            let code = resolve_furniture_code(&FurnitureCodeQuery::from_hotspot(hotspot));
            let category_id =
                resolve_category_id_for_hotspot(hotspot, code, categories, &code_to_category)?;
            Some(DisplayHotspot {
                hotspot: hotspot.clone(),
                code: code?,
                category_id,
            })
        })
        .collect()
}
