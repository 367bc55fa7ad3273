// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model binary validation
//!
//! Static hosts and CDNs answer a wrong model path with an HTML page and a 200.
//! Such a body must never reach the session factory or the persistent cache.

use crate::error::{Error, Result};

/// Bytes inspected for HTML markers
pub const SNIFF_LEN: usize = 256;

const HTML_MARKERS: &[&str] = &["<!doctype", "<html", "not found", "error"];

const REJECTED_CONTENT_TYPES: &[&str] = &["text/html", "text/plain"];

/// Reject a body whose head looks like an HTML or error page
pub fn ensure_model_binary(bytes: &[u8]) -> Result<()> {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let text = String::from_utf8_lossy(head).to_lowercase();
    match HTML_MARKERS.iter().find(|marker| text.contains(*marker)) {
        Some(marker) => Err(Error::InvalidModelBinary(format!(
            "received an HTML/error page instead of a model (found {:?})",
            marker
        ))),
        None => Ok(()),
    }
}

/// Reject text responses before reading the body
pub fn ensure_binary_content_type(content_type: Option<&str>) -> Result<()> {
    let Some(content_type) = content_type else {
        return Ok(());
    };
    let lowered = content_type.to_ascii_lowercase();
    if REJECTED_CONTENT_TYPES.iter().any(|t| lowered.contains(t)) {
        return Err(Error::InvalidModelBinary(format!(
            "model path returned {}",
            content_type
        )));
    }
    Ok(())
}
