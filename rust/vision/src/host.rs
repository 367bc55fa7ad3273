// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Collaborators supplied by the embedding host
//!
//! Everything here is single-threaded: futures are `LocalBoxFuture` and may hold
//! browser handles that are not `Send`.

use crate::error::Result;
use crate::types::{ImageMeta, ProcessedDetections};
use futures::future::LocalBoxFuture;

/// Pixels of a decoded image at natural resolution
#[derive(Debug, Clone, PartialEq)]
pub struct RgbaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A decoded image the pipeline can measure and read
pub trait SourceImage {
    fn natural_size(&self) -> ImageMeta;

    /// Read the pixels; a cross-origin tainted image fails with `Error::Security`
    fn rgba_pixels(&self) -> Result<RgbaFrame>;
}

/// Resolves image URLs into decoded images
pub trait ImageLoader<I: SourceImage> {
    /// Regular load with an anonymous cross-origin policy
    fn load<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<I>>;

    /// Same-origin fallback: fetch the bytes and decode them locally
    fn load_via_blob<'a>(&'a self, url: &'a str) -> LocalBoxFuture<'a, Result<I>>;
}

/// Runs the detector on one image
pub trait InferenceRunner<I: SourceImage> {
    fn run_inference<'a>(&'a self, image: &'a I) -> LocalBoxFuture<'a, Result<ProcessedDetections>>;
}

/// Wall clock and delays
pub trait Timer {
    /// Milliseconds since an arbitrary, fixed origin
    fn now_ms(&self) -> f64;

    fn sleep(&self, ms: u64) -> LocalBoxFuture<'static, ()>;
}
