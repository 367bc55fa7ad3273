// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Result type for detection pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading models, images or running inference
///
/// `Clone` so a single in-flight model load can hand the same failure to
/// every caller awaiting it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Image load failed: {0}")]
    ImageLoad(String),

    #[error("Cross-origin image access blocked: {0}")]
    Security(String),

    #[error("Operation aborted")]
    Aborted,

    #[error("Model fetch failed: {0}")]
    ModelFetch(String),

    #[error("Invalid model binary: {0}")]
    InvalidModelBinary(String),

    #[error("Session creation failed: {0}")]
    Session(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),
}

impl Error {
    /// Cancellation is a silent outcome, never an error state
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted)
    }

    /// Tainted-canvas failures are retried through the blob-fetch path
    pub fn is_security(&self) -> bool {
        matches!(self, Error::Security(_))
    }

    /// Short, stable name used in pipeline event payloads
    pub fn name(&self) -> &'static str {
        match self {
            Error::ImageLoad(_) => "ImageLoadError",
            Error::Security(_) => "SecurityError",
            Error::Aborted => "AbortError",
            Error::ModelFetch(_) => "ModelFetchError",
            Error::InvalidModelBinary(_) => "InvalidModelBinary",
            Error::Session(_) => "SessionError",
            Error::Inference(_) => "InferenceError",
            Error::MalformedOutput(_) => "MalformedOutput",
            Error::InvalidImage(_) => "InvalidImage",
        }
    }
}

impl From<futures::future::Aborted> for Error {
    fn from(_: futures::future::Aborted) -> Self {
        Error::Aborted
    }
}
