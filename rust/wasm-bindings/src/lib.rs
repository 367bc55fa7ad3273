// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Houme furniture hotspots for the browser
//!
//! JavaScript/TypeScript API over `houme-vision` built with wasm-bindgen.
//! Stateless helpers live alongside the `HotspotPipeline` and
//! `DetectionCache` classes.

use wasm_bindgen::prelude::*;

mod browser;
mod cache;
mod functions;
mod pipeline;
mod utils;

pub use cache::DetectionCacheJs;
pub use functions::*;
pub use pipeline::HotspotPipeline;
pub use utils::set_panic_hook as init_panic_hook;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}

/// Get the version of the hotspot bindings
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
