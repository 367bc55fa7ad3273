// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversions shared by the bindings

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

/// Set panic hook for better error messages in the browser
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Failures at the JS boundary
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Invalid {what}: {source}")]
    Input {
        what: &'static str,
        #[source]
        source: serde_wasm_bindgen::Error,
    },

    #[error("Serialization error: {0}")]
    Output(#[from] serde_wasm_bindgen::Error),

    #[error("Invalid config JSON: {0}")]
    Config(#[from] serde_json::Error),

    #[error("{0}")]
    Pipeline(#[from] houme_vision::Error),
}

impl From<BindingError> for JsValue {
    fn from(err: BindingError) -> Self {
        JsError::new(&err.to_string()).into()
    }
}

/// Deserialize a JS value, naming the argument on failure
pub fn from_js<T: DeserializeOwned>(value: JsValue, what: &'static str) -> Result<T, JsError> {
    serde_wasm_bindgen::from_value(value)
        .map_err(|source| JsError::new(&BindingError::Input { what, source }.to_string()))
}

/// `undefined`/`null` become `None`
pub fn from_js_opt<T: DeserializeOwned>(
    value: JsValue,
    what: &'static str,
) -> Result<Option<T>, JsError> {
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    from_js(value, what).map(Some)
}

/// Serialize into plain JS objects (maps become objects, not `Map`s)
pub fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| JsError::new(&BindingError::Output(e).to_string()))
}

/// Best-effort message of a thrown JS value
pub fn js_message(value: &JsValue) -> String {
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    if let Some(exception) = value.dyn_ref::<web_sys::DomException>() {
        return exception.message();
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}

/// Whether a thrown JS value is a cross-origin `SecurityError`
pub fn is_security_error(value: &JsValue) -> bool {
    value
        .dyn_ref::<web_sys::DomException>()
        .is_some_and(|e| e.name() == "SecurityError")
}

/// Whether a thrown JS value is an `AbortError`
pub fn is_abort_error(value: &JsValue) -> bool {
    value
        .dyn_ref::<web_sys::DomException>()
        .is_some_and(|e| e.name() == "AbortError")
}

pub fn set_js_prop(obj: &js_sys::Object, key: &str, value: &JsValue) -> Result<(), JsError> {
    js_sys::Reflect::set(obj, &key.into(), value)
        .map(|_| ())
        .map_err(|_| JsError::new(&format!("Failed to set property: {}", key)))
}
