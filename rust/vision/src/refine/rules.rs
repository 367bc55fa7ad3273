// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Weighted scoring rules per cabinet subtype
//!
//! Every subtype is a list of named terms, each a shape function over one
//! feature with bounds that may depend on the per-image context. Adding a
//! subtype or tweaking a rule only touches [`SUBTYPE_RULES`].

use super::features::{FurnitureFeatures, RefinementContext};
use super::RefinementOptions;
use crate::taxonomy::CabinetSubtype;
use Feature::*;
use Shape::*;

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// 0 below `start`, 1 above `end`, linear between; a step at `end` when `end <= start`
pub fn ramp_up(value: f64, start: f64, end: f64) -> f64 {
    if end <= start {
        return if value >= end { 1.0 } else { 0.0 };
    }
    if value <= start {
        return 0.0;
    }
    if value >= end {
        return 1.0;
    }
    (value - start) / (end - start)
}

/// 1 below `start`, 0 above `end`, linear between; a step at `start` when `end <= start`
pub fn ramp_down(value: f64, start: f64, end: f64) -> f64 {
    if end <= start {
        return if value <= start { 1.0 } else { 0.0 };
    }
    if value <= start {
        return 1.0;
    }
    if value >= end {
        return 0.0;
    }
    (end - value) / (end - start)
}

/// Triangle peaking at the midpoint of `[min, max]`, 0 at and outside the bounds
pub fn band_pass(value: f64, min: f64, max: f64) -> f64 {
    if max <= min || value <= min || value >= max {
        return 0.0;
    }
    let mid = (min + max) / 2.0;
    let half_span = (max - min) / 2.0;
    clamp01(1.0 - (value - mid).abs() / half_span)
}

/// Sum of weighted scores over the sum of weights (0 when no weight)
pub fn weighted_average(entries: &[(f64, f64)]) -> f64 {
    let denominator: f64 = entries.iter().map(|(weight, _)| weight).sum();
    if denominator == 0.0 {
        return 0.0;
    }
    let numerator: f64 = entries.iter().map(|(weight, score)| weight * score).sum();
    numerator / denominator
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    WidthRatio,
    HeightRatio,
    AreaRatio,
    AspectRatio,
    VerticalAspect,
    CenterYRatio,
    TopRatio,
    BottomRatio,
}

impl Feature {
    fn value(self, f: &FurnitureFeatures) -> f64 {
        match self {
            Feature::WidthRatio => f.width_ratio,
            Feature::HeightRatio => f.height_ratio,
            Feature::AreaRatio => f.area_ratio,
            Feature::AspectRatio => f.aspect_ratio,
            Feature::VerticalAspect => f.vertical_aspect,
            Feature::CenterYRatio => f.center_y_ratio,
            Feature::TopRatio => f.top_ratio,
            Feature::BottomRatio => f.bottom_ratio,
        }
    }
}

/// Shape-function bound, either a constant or derived from the context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Fixed(f64),
    /// `max(floor_line - floor_contact_padding, at_least)`
    FloorLine { at_least: f64 },
    /// `max(ceiling_line - ceiling_contact_padding, 0)`
    CeilingLine,
    /// `min(ceiling_line + offset, at_most)`
    CeilingReach { offset: f64, at_most: f64 },
    /// `max(median_width_ratio, at_least)`
    MedianWidth { at_least: f64 },
}

impl Bound {
    fn resolve(self, ctx: &RefinementContext, options: &RefinementOptions) -> f64 {
        match self {
            Bound::Fixed(v) => v,
            Bound::FloorLine { at_least } => {
                (ctx.floor_line - options.floor_contact_padding).max(at_least)
            }
            Bound::CeilingLine => (ctx.ceiling_line - options.ceiling_contact_padding).max(0.0),
            Bound::CeilingReach { offset, at_most } => (ctx.ceiling_line + offset).min(at_most),
            Bound::MedianWidth { at_least } => ctx.median_width_ratio.max(at_least),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    RampUp,
    RampDown,
    BandPass,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Term {
    Shaped {
        shape: Shape,
        feature: Feature,
        lo: Bound,
        hi: Bound,
    },
    /// Half credit per touched side wall
    WallContact,
}

impl Term {
    pub fn evaluate(
        &self,
        f: &FurnitureFeatures,
        ctx: &RefinementContext,
        options: &RefinementOptions,
    ) -> f64 {
        match *self {
            Term::Shaped {
                shape,
                feature,
                lo,
                hi,
            } => {
                let value = feature.value(f);
                let lo = lo.resolve(ctx, options);
                let hi = hi.resolve(ctx, options);
                match shape {
                    Shape::RampUp => ramp_up(value, lo, hi),
                    Shape::RampDown => ramp_down(value, lo, hi),
                    Shape::BandPass => band_pass(value, lo, hi),
                }
            }
            Term::WallContact => {
                let left = if f.touches_left_wall { 0.5 } else { 0.0 };
                let right = if f.touches_right_wall { 0.5 } else { 0.0 };
                clamp01(left + right)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub name: &'static str,
    pub weight: f64,
    pub term: Term,
}

const fn fixed(lo: f64, hi: f64) -> (Bound, Bound) {
    (Bound::Fixed(lo), Bound::Fixed(hi))
}

const fn rule(
    name: &'static str,
    weight: f64,
    shape: Shape,
    feature: Feature,
    bounds: (Bound, Bound),
) -> Rule {
    Rule {
        name,
        weight,
        term: Term::Shaped {
            shape,
            feature,
            lo: bounds.0,
            hi: bounds.1,
        },
    }
}

const LOWER_CABINET: &[Rule] = &[
    rule(
        "bottomContact",
        0.30,
        RampUp,
        BottomRatio,
        (Bound::FloorLine { at_least: 0.72 }, Bound::Fixed(1.0)),
    ),
    rule("heightBand", 0.25, BandPass, HeightRatio, fixed(0.22, 0.48)),
    rule("lowerPlacement", 0.20, RampUp, CenterYRatio, fixed(0.55, 0.9)),
    rule("verticalBalance", 0.15, RampDown, VerticalAspect, fixed(2.5, 5.5)),
    rule("topClearance", 0.10, RampUp, TopRatio, fixed(0.35, 0.7)),
];

const UPPER_CABINET: &[Rule] = &[
    rule(
        "ceilingProximity",
        0.30,
        RampDown,
        TopRatio,
        (Bound::CeilingLine, Bound::CeilingReach { offset: 0.12, at_most: 0.25 }),
    ),
    rule("detachedFromFloor", 0.25, RampDown, BottomRatio, fixed(0.45, 0.7)),
    rule("compactHeight", 0.20, BandPass, HeightRatio, fixed(0.18, 0.42)),
    rule("upperPlacement", 0.15, RampDown, CenterYRatio, fixed(0.3, 0.45)),
    rule("widthModeration", 0.10, BandPass, WidthRatio, fixed(0.05, 0.18)),
];

const WARDROBE: &[Rule] = &[
    rule("tallSilhouette", 0.30, RampUp, HeightRatio, fixed(0.52, 0.85)),
    rule(
        "floorContact",
        0.25,
        RampUp,
        BottomRatio,
        (Bound::FloorLine { at_least: 0.72 }, Bound::Fixed(1.0)),
    ),
    rule("ceilingReach", 0.20, RampDown, TopRatio, fixed(0.04, 0.2)),
    rule("slimWidth", 0.15, RampDown, AspectRatio, fixed(0.28, 0.58)),
    rule("verticalDominance", 0.10, RampUp, VerticalAspect, fixed(3.0, 7.0)),
];

const BUILT_IN_CLOSET: &[Rule] = &[
    rule(
        "spansWidth",
        0.25,
        RampUp,
        WidthRatio,
        (Bound::MedianWidth { at_least: 0.18 }, Bound::Fixed(0.55)),
    ),
    Rule {
        name: "touchesWalls",
        weight: 0.25,
        term: Term::WallContact,
    },
    rule("fullHeight", 0.20, RampUp, HeightRatio, fixed(0.6, 0.9)),
    rule("shallowAspect", 0.15, RampDown, AspectRatio, fixed(0.35, 0.6)),
    rule("coverage", 0.15, RampUp, AreaRatio, fixed(0.06, 0.18)),
];

const CHEST_OF_DRAWERS: &[Rule] = &[
    rule("compactHeight", 0.28, RampDown, HeightRatio, fixed(0.12, 0.3)),
    rule("nearFloor", 0.27, RampUp, BottomRatio, fixed(0.65, 0.98)),
    rule("proportion", 0.20, BandPass, AspectRatio, fixed(0.45, 1.0)),
    rule("localized", 0.15, BandPass, CenterYRatio, fixed(0.55, 0.9)),
    rule("verticalBalance", 0.10, RampDown, VerticalAspect, fixed(2.0, 3.5)),
];

const STORAGE_CABINET: &[Rule] = &[
    rule("midHeight", 0.28, BandPass, HeightRatio, fixed(0.25, 0.55)),
    rule(
        "floorAnchor",
        0.22,
        RampUp,
        BottomRatio,
        (Bound::FloorLine { at_least: 0.6 }, Bound::Fixed(0.98)),
    ),
    rule("widthStability", 0.20, BandPass, WidthRatio, fixed(0.08, 0.25)),
    rule("notCeiling", 0.18, RampDown, TopRatio, fixed(0.15, 0.4)),
    rule("balancedAspect", 0.12, RampDown, VerticalAspect, fixed(3.5, 5.5)),
];

/// Rule table in tie-break order
pub const SUBTYPE_RULES: &[(CabinetSubtype, &[Rule])] = &[
    (CabinetSubtype::LowerCabinet, LOWER_CABINET),
    (CabinetSubtype::UpperCabinet, UPPER_CABINET),
    (CabinetSubtype::Wardrobe, WARDROBE),
    (CabinetSubtype::BuiltInCloset, BUILT_IN_CLOSET),
    (CabinetSubtype::ChestOfDrawers, CHEST_OF_DRAWERS),
    (CabinetSubtype::StorageCabinet, STORAGE_CABINET),
];

/// Evaluate one subtype's rules, returning the weighted score and named partials
pub fn score_subtype(
    rules: &[Rule],
    f: &FurnitureFeatures,
    ctx: &RefinementContext,
    options: &RefinementOptions,
) -> (f64, Vec<(&'static str, f64)>) {
    let partials: Vec<(&'static str, f64)> = rules
        .iter()
        .map(|r| (r.name, r.term.evaluate(f, ctx, options)))
        .collect();
    let weighted: Vec<(f64, f64)> = rules
        .iter()
        .zip(&partials)
        .map(|(r, (_, score))| (r.weight, *score))
        .collect();
    (weighted_average(&weighted), partials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_band_pass_shape() {
        for &(min, max) in &[(0.0, 1.0), (0.22, 0.48), (-3.0, 5.0), (0.45, 1.0)] {
            assert_eq!(band_pass(min, min, max), 0.0);
            assert_eq!(band_pass(max, min, max), 0.0);
            assert_relative_eq!(band_pass((min + max) / 2.0, min, max), 1.0);
            assert_eq!(band_pass(max + 1.0, min, max), 0.0);
        }
        assert_eq!(band_pass(0.5, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_ramps() {
        assert_eq!(ramp_up(0.1, 0.2, 0.4), 0.0);
        assert_relative_eq!(ramp_up(0.3, 0.2, 0.4), 0.5, epsilon = 1e-12);
        assert_eq!(ramp_up(0.5, 0.2, 0.4), 1.0);
        assert_eq!(ramp_down(0.1, 0.2, 0.4), 1.0);
        assert_relative_eq!(ramp_down(0.35, 0.2, 0.4), 0.25, epsilon = 1e-12);
        assert_eq!(ramp_down(0.5, 0.2, 0.4), 0.0);
    }

    #[test]
    fn test_degenerate_ramps_are_steps() {
        assert_eq!(ramp_up(0.5, 0.6, 0.5), 1.0);
        assert_eq!(ramp_up(0.49, 0.6, 0.5), 0.0);
        assert_eq!(ramp_down(0.6, 0.6, 0.5), 1.0);
        assert_eq!(ramp_down(0.61, 0.6, 0.5), 0.0);
    }

    #[test]
    fn test_weighted_average_divides_by_weight_sum() {
        assert_relative_eq!(weighted_average(&[(1.0, 1.0), (3.0, 0.0)]), 0.25);
        assert_eq!(weighted_average(&[]), 0.0);
        assert_eq!(weighted_average(&[(0.0, 1.0)]), 0.0);
    }

    #[test]
    fn test_table_covers_every_subtype_in_order() {
        let order: Vec<_> = SUBTYPE_RULES.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, CabinetSubtype::ALL.to_vec());
        for (_, rules) in SUBTYPE_RULES {
            assert_eq!(rules.len(), 5);
            let total: f64 = rules.iter().map(|r| r.weight).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        }
    }
}
