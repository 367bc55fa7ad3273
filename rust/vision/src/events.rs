// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline event sinks
//!
//! Events are fire-and-forget: a sink returns nothing and must not panic, so a
//! broken log target can never fail a detection run.

use serde_json::{Map, Value};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warn,
}

impl EventLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
        }
    }
}

pub trait EventSink {
    fn log_event(&self, name: &str, payload: &Value, level: EventLevel);
}

impl<F> EventSink for F
where
    F: Fn(&str, &Value, EventLevel),
{
    fn log_event(&self, name: &str, payload: &Value, level: EventLevel) {
        self(name, payload, level)
    }
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log_event(&self, name: &str, payload: &Value, level: EventLevel) {
        match level {
            EventLevel::Info => tracing::info!(event = name, %payload, "furniture pipeline"),
            EventLevel::Warn => tracing::warn!(event = name, %payload, "furniture pipeline"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn log_event(&self, _name: &str, _payload: &Value, _level: EventLevel) {}
}

/// Per-run logger that tags every payload with the mirror flag
///
/// An `imageUrl` key is stripped before forwarding; image locations never
/// reach the log target.
#[derive(Clone)]
pub struct HotspotLogger {
    sink: Rc<dyn EventSink>,
    mirrored: bool,
}

impl HotspotLogger {
    pub fn new(sink: Rc<dyn EventSink>, mirrored: bool) -> Self {
        Self { sink, mirrored }
    }

    pub fn mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn with_mirrored(&self, mirrored: bool) -> Self {
        Self {
            sink: Rc::clone(&self.sink),
            mirrored,
        }
    }

    pub fn info(&self, name: &str, payload: Value) {
        self.log(name, payload, EventLevel::Info);
    }

    pub fn warn(&self, name: &str, payload: Value) {
        self.log(name, payload, EventLevel::Warn);
    }

    pub fn log(&self, name: &str, payload: Value, level: EventLevel) {
        let mut enriched = Map::new();
        enriched.insert("mirrored".to_string(), Value::Bool(self.mirrored));
        if let Value::Object(fields) = payload {
            for (key, value) in fields {
                if key != "imageUrl" {
                    enriched.insert(key, value);
                }
            }
        }
        self.sink.log_event(name, &Value::Object(enriched), level);
    }
}

impl std::fmt::Debug for HotspotLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotspotLogger")
            .field("mirrored", &self.mirrored)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Sink that records every event for assertions
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: RefCell<Vec<(String, Value, EventLevel)>>,
    }

    impl RecordingSink {
        pub fn names(&self) -> Vec<String> {
            self.events.borrow().iter().map(|(n, _, _)| n.clone()).collect()
        }

        pub fn find(&self, name: &str) -> Option<(Value, EventLevel)> {
            self.events
                .borrow()
                .iter()
                .find(|(n, _, _)| n == name)
                .map(|(_, p, l)| (p.clone(), *l))
        }
    }

    impl EventSink for RecordingSink {
        fn log_event(&self, name: &str, payload: &Value, level: EventLevel) {
            self.events
                .borrow_mut()
                .push((name.to_string(), payload.clone(), level));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_enriched_and_url_stripped() {
        let sink = Rc::new(RecordingSink::default());
        let logger = HotspotLogger::new(sink.clone(), true);
        logger.info(
            "inference-start",
            json!({"imageUrl": "https://cdn/x.png", "naturalWidth": 1536}),
        );
        logger.warn("cors-image-unavailable", Value::Null);

        let (payload, level) = sink.find("inference-start").unwrap();
        assert_eq!(level, EventLevel::Info);
        assert_eq!(payload, json!({"mirrored": true, "naturalWidth": 1536}));

        let (payload, level) = sink.find("cors-image-unavailable").unwrap();
        assert_eq!(level, EventLevel::Warn);
        assert_eq!(payload, json!({"mirrored": true}));
    }

    #[test]
    fn test_closure_sink() {
        let seen = std::cell::Cell::new(0);
        let sink = |_: &str, _: &Value, _: EventLevel| seen.set(seen.get() + 1);
        sink.log_event("label-summary", &Value::Null, EventLevel::Info);
        NullSink.log_event("label-summary", &Value::Null, EventLevel::Info);
        TracingSink.log_event("label-summary", &Value::Null, EventLevel::Warn);
        assert_eq!(seen.get(), 1);
    }
}
