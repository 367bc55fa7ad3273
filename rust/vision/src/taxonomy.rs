// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static class tables and furniture category mappings
//!
//! Class indices follow the Objects365 convention after normalization: the model
//! emits one-based labels (0 is background) and everything past the decoder uses
//! zero-based indices.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Zero-based index of the coarse `Cabinet/shelf` class
pub const CABINET_SHELF_INDEX: usize = 12;

/// Furniture-relevant classes kept after inference, with their display names
pub const FURNITURE_CLASSES: &[(usize, &str)] = &[
    (2, "Chair"),
    (9, "Desk"),
    (CABINET_SHELF_INDEX, "Cabinet/shelf"),
    (20, "Storage box"),
    (24, "Bench"),
    (37, "Monitor/TV"),
    (47, "Stool"),
    (50, "Couch"),
    (75, "Bed"),
    (79, "Mirror"),
    (98, "Dining Table"),
    (121, "Nightstand"),
    (167, "Coffee Table"),
    (168, "Side Table"),
];

/// Convert the model's one-based label to the internal zero-based index
///
/// Returns `None` for the reserved background label and anything below it.
pub fn normalize_label(one_based: i64) -> Option<usize> {
    usize::try_from(one_based - 1).ok()
}

pub fn is_furniture_index(index: usize) -> bool {
    FURNITURE_CLASSES.iter().any(|(idx, _)| *idx == index)
}

pub fn is_cabinet_shelf_index(index: usize) -> bool {
    index == CABINET_SHELF_INDEX
}

/// Display name of a furniture class, if the index belongs to the furniture set
pub fn class_name(index: usize) -> Option<&'static str> {
    FURNITURE_CLASSES
        .iter()
        .find(|(idx, _)| *idx == index)
        .map(|(_, name)| *name)
}

/// Human-readable class description for logs (`idx_N` when unknown)
pub fn describe_index(index: Option<usize>) -> String {
    match index {
        None => "unknown".to_string(),
        Some(idx) => class_name(idx)
            .map(str::to_string)
            .unwrap_or_else(|| format!("idx_{}", idx)),
    }
}

/// Fine-grained subtype assigned to `Cabinet/shelf` detections
///
/// Declaration order is the tie-break order of the refinement engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum CabinetSubtype {
    LowerCabinet,
    UpperCabinet,
    Wardrobe,
    BuiltInCloset,
    ChestOfDrawers,
    StorageCabinet,
}

impl CabinetSubtype {
    pub const ALL: [CabinetSubtype; 6] = [
        CabinetSubtype::LowerCabinet,
        CabinetSubtype::UpperCabinet,
        CabinetSubtype::Wardrobe,
        CabinetSubtype::BuiltInCloset,
        CabinetSubtype::ChestOfDrawers,
        CabinetSubtype::StorageCabinet,
    ];

    pub fn key(self) -> &'static str {
        match self {
            CabinetSubtype::LowerCabinet => "lowerCabinet",
            CabinetSubtype::UpperCabinet => "upperCabinet",
            CabinetSubtype::Wardrobe => "wardrobe",
            CabinetSubtype::BuiltInCloset => "builtInCloset",
            CabinetSubtype::ChestOfDrawers => "chestOfDrawers",
            CabinetSubtype::StorageCabinet => "storageCabinet",
        }
    }

    pub fn label_en(self) -> &'static str {
        match self {
            CabinetSubtype::LowerCabinet => "base cabinet",
            CabinetSubtype::UpperCabinet => "wall cabinet",
            CabinetSubtype::Wardrobe => "wardrobe",
            CabinetSubtype::BuiltInCloset => "built-in closet",
            CabinetSubtype::ChestOfDrawers => "chest of drawers",
            CabinetSubtype::StorageCabinet => "storage cabinet",
        }
    }

    pub fn label_ko(self) -> &'static str {
        match self {
            CabinetSubtype::LowerCabinet => "하부장",
            CabinetSubtype::UpperCabinet => "상부장",
            CabinetSubtype::Wardrobe => "옷장",
            CabinetSubtype::BuiltInCloset => "붙박이장",
            CabinetSubtype::ChestOfDrawers => "서랍장",
            CabinetSubtype::StorageCabinet => "수납장",
        }
    }

    /// Purchasable category for this subtype
    ///
    /// `UpperCabinet` has no category and is excluded from recommendations.
    pub fn category_code(self) -> Option<FurnitureCategoryCode> {
        match self {
            CabinetSubtype::LowerCabinet => Some(FurnitureCategoryCode::DisplayCabinet),
            CabinetSubtype::UpperCabinet => None,
            CabinetSubtype::Wardrobe => Some(FurnitureCategoryCode::Closet),
            CabinetSubtype::BuiltInCloset => Some(FurnitureCategoryCode::Closet),
            CabinetSubtype::ChestOfDrawers => Some(FurnitureCategoryCode::Drawer),
            CabinetSubtype::StorageCabinet => Some(FurnitureCategoryCode::DisplayCabinet),
        }
    }
}

impl fmt::Display for CabinetSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Closed set of category codes understood by the recommendation backend
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FurnitureCategoryCode {
    Single,
    OfficeDesk,
    Closet,
    DiningTable,
    SingleSofa,
    Drawer,
    MovableTv,
    SittingTable,
    Mirror,
    WhiteBookshelf,
    DisplayCabinet,
    TwoSeaterSofa,
}

impl FurnitureCategoryCode {
    pub const ALL: [FurnitureCategoryCode; 12] = [
        FurnitureCategoryCode::Single,
        FurnitureCategoryCode::OfficeDesk,
        FurnitureCategoryCode::Closet,
        FurnitureCategoryCode::DiningTable,
        FurnitureCategoryCode::SingleSofa,
        FurnitureCategoryCode::Drawer,
        FurnitureCategoryCode::MovableTv,
        FurnitureCategoryCode::SittingTable,
        FurnitureCategoryCode::Mirror,
        FurnitureCategoryCode::WhiteBookshelf,
        FurnitureCategoryCode::DisplayCabinet,
        FurnitureCategoryCode::TwoSeaterSofa,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FurnitureCategoryCode::Single => "SINGLE",
            FurnitureCategoryCode::OfficeDesk => "OFFICE_DESK",
            FurnitureCategoryCode::Closet => "CLOSET",
            FurnitureCategoryCode::DiningTable => "DINING_TABLE",
            FurnitureCategoryCode::SingleSofa => "SINGLE_SOFA",
            FurnitureCategoryCode::Drawer => "DRAWER",
            FurnitureCategoryCode::MovableTv => "MOVABLE_TV",
            FurnitureCategoryCode::SittingTable => "SITTING_TABLE",
            FurnitureCategoryCode::Mirror => "MIRROR",
            FurnitureCategoryCode::WhiteBookshelf => "WHITE_BOOKSHELF",
            FurnitureCategoryCode::DisplayCabinet => "DISPLAY_CABINET",
            FurnitureCategoryCode::TwoSeaterSofa => "TWO_SEATER_SOFA",
        }
    }
}

impl fmt::Display for FurnitureCategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a string is not one of the twelve category codes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown furniture category code: {0}")]
pub struct UnknownCategoryCode(pub String);

impl FromStr for FurnitureCategoryCode {
    type Err = UnknownCategoryCode;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_uppercase();
        FurnitureCategoryCode::ALL
            .into_iter()
            .find(|code| code.as_str() == normalized)
            .ok_or(UnknownCategoryCode(raw.to_string()))
    }
}

/// Parse a server/category string into a code, `None` when outside the closed set
pub fn to_furniture_category_code(raw: &str) -> Option<FurnitureCategoryCode> {
    raw.parse().ok()
}

use FurnitureCategoryCode as Code;

// Chair, Bench, Stool and Nightstand stay detectable but have no purchasable category.
const FINAL_LABEL_CODES: &[(&str, &[Code])] = &[
    ("Cabinet/shelf", &[Code::DisplayCabinet]),
    ("Desk", &[Code::OfficeDesk]),
    ("Storage box", &[Code::Drawer]),
    ("Monitor/TV", &[Code::MovableTv]),
    ("Couch", &[Code::TwoSeaterSofa, Code::SingleSofa]),
    ("Bed", &[Code::Single]),
    ("Mirror", &[Code::Mirror]),
    ("Dining Table", &[Code::DiningTable]),
    ("Coffee Table", &[Code::SittingTable]),
    ("Side Table", &[Code::SittingTable]),
];

const INDEX_CODES: &[(usize, &[Code])] = &[
    (9, &[Code::OfficeDesk]),
    (CABINET_SHELF_INDEX, &[Code::DisplayCabinet]),
    (20, &[Code::Drawer]),
    (37, &[Code::MovableTv]),
    (50, &[Code::TwoSeaterSofa, Code::SingleSofa]),
    (75, &[Code::Single]),
    (79, &[Code::Mirror]),
    (98, &[Code::DiningTable]),
    (167, &[Code::SittingTable]),
    (168, &[Code::SittingTable]),
];

/// Lowercase the label and collapse every non-alphanumeric run into `_`
pub fn normalize_label_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut in_separator = false;
    for c in raw.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            key.push(c);
            in_separator = false;
        } else if !in_separator {
            key.push('_');
            in_separator = true;
        }
    }
    key
}

fn final_label_table() -> &'static FxHashMap<String, Vec<Code>> {
    static TABLE: OnceLock<FxHashMap<String, Vec<Code>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table: FxHashMap<String, Vec<Code>> = FxHashMap::default();
        for (label, codes) in FINAL_LABEL_CODES {
            let key = normalize_label_key(label);
            if key.is_empty() {
                continue;
            }
            let entry = table.entry(key).or_default();
            for code in codes.iter() {
                if !entry.contains(code) {
                    entry.push(*code);
                }
            }
        }
        table
    })
}

/// Codes for a model's final textual label, in priority order
pub fn codes_for_final_label(label: &str) -> &'static [Code] {
    let key = normalize_label_key(label);
    if key.is_empty() {
        return &[];
    }
    final_label_table()
        .get(&key)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Codes for a zero-based class index, in priority order
pub fn codes_for_index(index: usize) -> &'static [Code] {
    INDEX_CODES
        .iter()
        .find(|(idx, _)| *idx == index)
        .map(|(_, codes)| *codes)
        .unwrap_or(&[])
}

/// Whether a furniture-class index maps to any purchasable category
pub fn has_furniture_code_for_index(index: usize) -> bool {
    is_furniture_index(index) && !codes_for_index(index).is_empty()
}
