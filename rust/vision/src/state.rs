// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hotspot pipeline state machine
//!
//! [`reduce`] is a pure transition function. Logging lives in [`HotspotStore`],
//! a decorator that records each action before applying it, and run
//! bookkeeping lives in [`RunGuard`].

use crate::error::Error;
use crate::events::HotspotLogger;
use crate::projection::Projection;
use crate::types::{ContainerSize, DebugRect, Hotspot, ImageMeta, RenderMetrics};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Loading,
    Processing,
    Ready,
    Error,
}

/// Snapshot of the pipeline; arrays are shared so unchanged data keeps its identity
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotState {
    pub status: PipelineStatus,
    pub hotspots: Rc<[Hotspot]>,
    pub projected_hotspots: Rc<[Hotspot]>,
    pub debug_rects: Rc<[DebugRect]>,
    pub image_meta: Option<ImageMeta>,
    pub render_metrics: Option<RenderMetrics>,
    pub container_size: ContainerSize,
    pub error: Option<Error>,
}

impl Default for HotspotState {
    fn default() -> Self {
        Self {
            status: PipelineStatus::Idle,
            hotspots: Rc::from(Vec::new()),
            projected_hotspots: Rc::from(Vec::new()),
            debug_rects: Rc::from(Vec::new()),
            image_meta: None,
            render_metrics: None,
            container_size: ContainerSize::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HotspotAction {
    PipelineReset,
    InferenceStarted,
    HotspotsReady {
        hotspots: Vec<Hotspot>,
        image_meta: ImageMeta,
    },
    ProjectedReady(Projection),
    SetRenderMetrics(Option<RenderMetrics>),
    SetContainerSize(ContainerSize),
    PipelineError(Option<Error>),
}

impl HotspotAction {
    pub fn name(&self) -> &'static str {
        match self {
            HotspotAction::PipelineReset => "PIPELINE_RESET",
            HotspotAction::InferenceStarted => "INFERENCE_STARTED",
            HotspotAction::HotspotsReady { .. } => "HOTSPOTS_READY",
            HotspotAction::ProjectedReady(_) => "PROJECTED_READY",
            HotspotAction::SetRenderMetrics(_) => "SET_RENDER_METRICS",
            HotspotAction::SetContainerSize(_) => "SET_CONTAINER_SIZE",
            HotspotAction::PipelineError(_) => "PIPELINE_ERROR",
        }
    }
}

/// Field-wise comparison of the values the UI renders
fn hotspots_equal(prev: &[Hotspot], next: &[Hotspot]) -> bool {
    prev.len() == next.len()
        && prev.iter().zip(next).all(|(a, b)| {
            a.id == b.id
                && a.detection.score == b.detection.score
                && a.confidence == b.confidence
                && a.refined_label == b.refined_label
                && a.refined_label_en == b.refined_label_en
                && a.final_label == b.final_label
                && a.cx == b.cx
                && a.cy == b.cy
        })
}

pub fn reduce(state: &HotspotState, action: HotspotAction) -> HotspotState {
    match action {
        HotspotAction::PipelineReset => HotspotState {
            container_size: state.container_size,
            ..HotspotState::default()
        },
        HotspotAction::InferenceStarted => HotspotState {
            status: PipelineStatus::Loading,
            error: None,
            ..state.clone()
        },
        HotspotAction::HotspotsReady {
            hotspots,
            image_meta,
        } => {
            let unchanged =
                state.image_meta.is_some() && hotspots_equal(&state.hotspots, &hotspots);
            let hotspots = if unchanged {
                Rc::clone(&state.hotspots)
            } else {
                Rc::from(hotspots)
            };
            HotspotState {
                status: PipelineStatus::Processing,
                hotspots,
                image_meta: Some(image_meta),
                ..state.clone()
            }
        }
        HotspotAction::ProjectedReady(projection) => {
            let unchanged =
                hotspots_equal(&state.projected_hotspots, &projection.projected_hotspots)
                    && state.debug_rects[..] == projection.debug_rects[..];
            if unchanged {
                return HotspotState {
                    status: PipelineStatus::Ready,
                    ..state.clone()
                };
            }
            HotspotState {
                status: PipelineStatus::Ready,
                projected_hotspots: Rc::from(projection.projected_hotspots),
                debug_rects: Rc::from(projection.debug_rects),
                ..state.clone()
            }
        }
        HotspotAction::SetRenderMetrics(metrics) => HotspotState {
            render_metrics: metrics,
            ..state.clone()
        },
        HotspotAction::SetContainerSize(size) => HotspotState {
            container_size: size,
            ..state.clone()
        },
        HotspotAction::PipelineError(error) => HotspotState {
            status: PipelineStatus::Error,
            error,
            hotspots: Rc::from(Vec::new()),
            projected_hotspots: Rc::from(Vec::new()),
            debug_rects: Rc::from(Vec::new()),
            ..state.clone()
        },
    }
}

/// Reducer owner that logs every dispatched action
#[derive(Debug)]
pub struct HotspotStore {
    state: HotspotState,
    logger: HotspotLogger,
}

impl HotspotStore {
    pub fn new(logger: HotspotLogger) -> Self {
        Self {
            state: HotspotState::default(),
            logger,
        }
    }

    pub fn state(&self) -> &HotspotState {
        &self.state
    }

    pub fn set_logger(&mut self, logger: HotspotLogger) {
        self.logger = logger;
    }

    pub fn dispatch(&mut self, action: HotspotAction) {
        // Side channels short-circuit before logging so resize storms stay quiet
        match &action {
            HotspotAction::SetRenderMetrics(metrics) if *metrics == self.state.render_metrics => {
                return
            }
            HotspotAction::SetContainerSize(size) if *size == self.state.container_size => return,
            _ => {}
        }
        self.logger
            .info("hotspot-action", json!({ "type": action.name() }));
        self.state = reduce(&self.state, action);
    }
}

/// Progress of the run for the current `(image_url, mirrored)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running { generation: u64 },
    Done,
}

/// Proof that a run was admitted; stale once the source changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    generation: u64,
}

/// Re-entrancy guard: at most one run per source, never two at once
#[derive(Debug, Clone)]
pub struct RunGuard {
    source: Option<(String, bool)>,
    phase: RunPhase,
    generation: u64,
}

impl Default for RunGuard {
    fn default() -> Self {
        Self {
            source: None,
            phase: RunPhase::Idle,
            generation: 0,
        }
    }
}

impl RunGuard {
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Point the guard at a source; returns true when it changed
    pub fn set_source(&mut self, image_url: &str, mirrored: bool) -> bool {
        let unchanged = self
            .source
            .as_ref()
            .is_some_and(|(url, m)| url == image_url && *m == mirrored);
        if unchanged {
            return false;
        }
        self.source = Some((image_url.to_string(), mirrored));
        self.invalidate();
        true
    }

    /// Drop any in-flight run and allow a fresh one
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.phase = RunPhase::Idle;
    }

    pub fn try_begin(&mut self) -> Option<RunTicket> {
        if self.source.is_none() || self.phase != RunPhase::Idle {
            return None;
        }
        self.phase = RunPhase::Running {
            generation: self.generation,
        };
        Some(RunTicket {
            generation: self.generation,
        })
    }

    pub fn is_current(&self, ticket: RunTicket) -> bool {
        self.phase
            == RunPhase::Running {
                generation: ticket.generation,
            }
    }

    /// Close a run; a successful one marks the source done
    pub fn finish(&mut self, ticket: RunTicket, succeeded: bool) {
        if self.is_current(ticket) {
            self.phase = if succeeded {
                RunPhase::Done
            } else {
                RunPhase::Idle
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingSink;
    use crate::types::{BBox, Detection};

    fn hotspot(id: u32, cx: f64) -> Hotspot {
        Hotspot {
            id,
            detection: Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.8, 75),
            cx,
            cy: 5.0,
            refined_label: None,
            refined_label_en: None,
            final_label: Some("Bed".into()),
            confidence: None,
        }
    }

    const META: ImageMeta = ImageMeta {
        width: 100.0,
        height: 100.0,
    };

    #[test]
    fn test_happy_path_statuses() {
        let mut state = HotspotState::default();
        state = reduce(&state, HotspotAction::InferenceStarted);
        assert_eq!(state.status, PipelineStatus::Loading);
        state = reduce(
            &state,
            HotspotAction::HotspotsReady {
                hotspots: vec![hotspot(1, 5.0)],
                image_meta: META,
            },
        );
        assert_eq!(state.status, PipelineStatus::Processing);
        state = reduce(
            &state,
            HotspotAction::ProjectedReady(Projection {
                projected_hotspots: vec![hotspot(1, 2.5)],
                debug_rects: vec![],
            }),
        );
        assert_eq!(state.status, PipelineStatus::Ready);
        assert_eq!(state.projected_hotspots[0].cx, 2.5);
    }

    #[test]
    fn test_equal_hotspots_keep_identity() {
        let mut state = reduce(
            &HotspotState::default(),
            HotspotAction::HotspotsReady {
                hotspots: vec![hotspot(1, 5.0)],
                image_meta: META,
            },
        );
        let before = Rc::clone(&state.hotspots);
        state = reduce(
            &state,
            HotspotAction::HotspotsReady {
                hotspots: vec![hotspot(1, 5.0)],
                image_meta: META,
            },
        );
        assert!(Rc::ptr_eq(&before, &state.hotspots));

        state = reduce(
            &state,
            HotspotAction::HotspotsReady {
                hotspots: vec![hotspot(1, 6.0)],
                image_meta: META,
            },
        );
        assert!(!Rc::ptr_eq(&before, &state.hotspots));
    }

    #[test]
    fn test_reset_keeps_container_size() {
        let mut state = reduce(
            &HotspotState::default(),
            HotspotAction::SetContainerSize(ContainerSize::new(400.0, 300.0)),
        );
        state = reduce(&state, HotspotAction::InferenceStarted);
        state = reduce(&state, HotspotAction::PipelineReset);
        assert_eq!(state.status, PipelineStatus::Idle);
        assert_eq!(state.container_size, ContainerSize::new(400.0, 300.0));
    }

    #[test]
    fn test_error_clears_arrays_and_restart_clears_error() {
        let mut state = reduce(
            &HotspotState::default(),
            HotspotAction::HotspotsReady {
                hotspots: vec![hotspot(1, 5.0)],
                image_meta: META,
            },
        );
        state = reduce(
            &state,
            HotspotAction::PipelineError(Some(Error::Inference("boom".into()))),
        );
        assert_eq!(state.status, PipelineStatus::Error);
        assert!(state.hotspots.is_empty());
        assert!(state.error.is_some());

        state = reduce(&state, HotspotAction::InferenceStarted);
        assert_eq!(state.status, PipelineStatus::Loading);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_store_logs_and_skips_unchanged_side_channels() {
        let sink = Rc::new(RecordingSink::default());
        let mut store = HotspotStore::new(HotspotLogger::new(sink.clone(), false));
        store.dispatch(HotspotAction::SetContainerSize(ContainerSize::new(1.0, 1.0)));
        store.dispatch(HotspotAction::SetContainerSize(ContainerSize::new(1.0, 1.0)));
        store.dispatch(HotspotAction::InferenceStarted);

        assert_eq!(sink.names(), vec!["hotspot-action", "hotspot-action"]);
        let (payload, _) = sink.find("hotspot-action").unwrap();
        assert_eq!(payload["type"], "SET_CONTAINER_SIZE");
        assert_eq!(payload["mirrored"], false);
        assert_eq!(store.state().status, PipelineStatus::Loading);
    }

    #[test]
    fn test_run_guard_admits_one_run_per_source() {
        let mut guard = RunGuard::default();
        assert!(guard.try_begin().is_none());

        assert!(guard.set_source("a.png", false));
        let ticket = guard.try_begin().unwrap();
        assert!(guard.try_begin().is_none());
        guard.finish(ticket, true);
        assert_eq!(guard.phase(), RunPhase::Done);
        assert!(guard.try_begin().is_none());

        assert!(!guard.set_source("a.png", false));
        assert!(guard.set_source("a.png", true));
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut guard = RunGuard::default();
        guard.set_source("a.png", false);
        let stale = guard.try_begin().unwrap();
        guard.set_source("b.png", false);
        assert!(!guard.is_current(stale));

        let fresh = guard.try_begin().unwrap();
        guard.finish(stale, true);
        assert!(guard.is_current(fresh));
        guard.finish(fresh, false);
        assert_eq!(guard.phase(), RunPhase::Idle);
    }
}
