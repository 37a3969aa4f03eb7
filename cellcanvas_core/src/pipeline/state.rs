//! Control state and its pure transition function.
//!
//! [`ControlState::handle`] never touches storage or threads: it records user
//! settings, decides which jobs to start and tracks the debounce deadline for
//! the refresh cascade that follows label changes. Time is passed in so the
//! debounce is testable without sleeping.

use std::time::{Duration, Instant};

use crate::config::CanvasConfig;
use crate::features::{FeatureSelection, RegionPolicy};
use crate::jobs::{JobKind, JobOutcome};
use crate::learner::ModelKind;
use crate::volume::Label;

use super::command::{Command, Effect, FitRequest};

#[derive(Debug, Clone)]
pub struct ControlState {
    selection: FeatureSelection,
    region_policy: RegionPolicy,
    model_kind: ModelKind,
    active_label: Label,
    live_fit: bool,
    live_prediction: bool,
    has_model: bool,
    debounce: Duration,
    refresh_due: Option<Instant>,
}

impl ControlState {
    pub fn new(config: &CanvasConfig) -> Self {
        Self {
            selection: config.features.clone(),
            region_policy: config.pipeline.region.clone(),
            model_kind: config.classifier.kind,
            active_label: 1,
            live_fit: config.pipeline.live_fit,
            live_prediction: config.pipeline.live_prediction,
            has_model: false,
            debounce: config.pipeline.debounce,
            refresh_due: None,
        }
    }

    pub fn selection(&self) -> &FeatureSelection {
        &self.selection
    }

    pub fn region_policy(&self) -> &RegionPolicy {
        &self.region_policy
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    pub fn active_label(&self) -> Label {
        self.active_label
    }

    pub fn live_fit(&self) -> bool {
        self.live_fit
    }

    pub fn live_prediction(&self) -> bool {
        self.live_prediction
    }

    pub fn has_model(&self) -> bool {
        self.has_model
    }

    /// When the pending refresh cascade fires, if one is pending.
    pub fn refresh_due(&self) -> Option<Instant> {
        self.refresh_due
    }

    fn fit_request(&self) -> Effect {
        Effect::StartFit(FitRequest {
            kind: self.model_kind,
            policy: self.region_policy.clone(),
            selection: self.selection.clone(),
        })
    }

    /// Restart the quiescence window; bursts coalesce into one refresh.
    fn schedule_refresh(&mut self, now: Instant) {
        self.refresh_due = Some(now + self.debounce);
    }

    pub fn handle(&mut self, command: Command, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match command {
            Command::Paint(paint) => {
                if paint.strokes.is_empty() {
                    return effects;
                }
                effects.push(Effect::ApplyPaint(paint));
                self.schedule_refresh(now);
                if self.live_fit {
                    effects.push(self.fit_request());
                }
            }
            Command::FitRequested => effects.push(self.fit_request()),
            Command::PredictRequested => effects.push(Effect::StartPredict),
            Command::BackgroundEstimateRequested => {
                effects.push(Effect::StartBackgroundEstimate {
                    selection: self.selection.clone(),
                });
            }
            Command::SelectionMade { polygon } => effects.push(Effect::StartSelection {
                polygon,
                label: self.active_label,
            }),
            Command::SetActiveLabel(label) => self.active_label = label,
            Command::SetFeatureEnabled { source, enabled } => self.selection.set(source, enabled),
            Command::SetRegionPolicy(policy) => self.region_policy = policy,
            Command::SetModelKind(kind) => self.model_kind = kind,
            Command::SetLiveFit(enabled) => {
                let turned_on = enabled && !self.live_fit;
                self.live_fit = enabled;
                if turned_on {
                    effects.push(self.fit_request());
                }
            }
            Command::SetLivePrediction(enabled) => {
                let turned_on = enabled && !self.live_prediction;
                self.live_prediction = enabled;
                if turned_on && self.has_model {
                    effects.push(Effect::StartPredict);
                }
            }
            Command::Completed(completion) => {
                if completion.outcome != JobOutcome::Published {
                    return effects;
                }
                match completion.kind {
                    JobKind::Fit => {
                        self.has_model = true;
                        self.schedule_refresh(now);
                        if self.live_prediction {
                            effects.push(Effect::StartPredict);
                        }
                    }
                    kind if kind.mutates_labels() => self.schedule_refresh(now),
                    _ => {}
                }
            }
        }
        effects
    }

    /// Fire the refresh cascade once its deadline has passed.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        match self.refresh_due {
            Some(due) if now >= due => {
                self.refresh_due = None;
                vec![
                    Effect::RefreshStats,
                    Effect::RebuildEmbedding {
                        selection: self.selection.clone(),
                    },
                ]
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::command::{Completion, PaintEvent};
    use cellcanvas_shared::Polygon;

    fn state() -> ControlState {
        ControlState::new(&CanvasConfig::default())
    }

    fn paint() -> Command {
        Command::Paint(PaintEvent::brush([[0, 0, 0]], 1))
    }

    fn completed(kind: JobKind, outcome: JobOutcome) -> Command {
        Command::Completed(Completion {
            kind,
            generation: 1,
            outcome,
        })
    }

    #[test]
    fn paint_bursts_coalesce_into_one_refresh() {
        let mut state = state();
        let t0 = Instant::now();

        assert_eq!(state.handle(paint(), t0).len(), 1);
        state.handle(paint(), t0 + Duration::from_millis(500));
        assert!(state.tick(t0 + Duration::from_millis(1200)).is_empty());

        let fired = state.tick(t0 + Duration::from_millis(1500));
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0], Effect::RefreshStats);
        assert!(matches!(fired[1], Effect::RebuildEmbedding { .. }));
        assert!(state.tick(t0 + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn paint_only_fits_when_live_fitting() {
        let mut state = state();
        let now = Instant::now();
        let effects = state.handle(paint(), now);
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartFit(_))));

        // turning live fitting on fits right away
        let effects = state.handle(Command::SetLiveFit(true), now);
        assert!(matches!(effects.as_slice(), [Effect::StartFit(_)]));

        let effects = state.handle(paint(), now);
        assert!(matches!(effects[0], Effect::ApplyPaint(_)));
        assert!(matches!(effects[1], Effect::StartFit(_)));
    }

    #[test]
    fn fit_chains_into_predict_only_with_live_prediction() {
        let mut state = state();
        let now = Instant::now();
        assert!(state
            .handle(completed(JobKind::Fit, JobOutcome::Published), now)
            .is_empty());
        assert!(state.has_model());
        assert!(state.refresh_due().is_some());

        let effects = state.handle(Command::SetLivePrediction(true), now);
        assert_eq!(effects, vec![Effect::StartPredict]);
        let effects = state.handle(completed(JobKind::Fit, JobOutcome::Published), now);
        assert_eq!(effects, vec![Effect::StartPredict]);

        // predict never chains back into fit
        let effects = state.handle(completed(JobKind::Predict, JobOutcome::Published), now);
        assert!(effects.is_empty());
    }

    #[test]
    fn live_prediction_without_model_waits_for_fit() {
        let mut state = state();
        let effects = state.handle(Command::SetLivePrediction(true), Instant::now());
        assert!(effects.is_empty());
    }

    #[test]
    fn label_mutating_jobs_schedule_refresh() {
        let mut state = state();
        let now = Instant::now();
        state.handle(completed(JobKind::Selection, JobOutcome::Discarded), now);
        assert!(state.refresh_due().is_none());
        state.handle(completed(JobKind::BackgroundEstimate, JobOutcome::Published), now);
        assert_eq!(state.refresh_due(), Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn selection_uses_active_label_and_fit_captures_settings() {
        let mut state = state();
        let now = Instant::now();
        state.handle(Command::SetActiveLabel(4), now);
        state.handle(
            Command::SetFeatureEnabled {
                source: "skimage".into(),
                enabled: true,
            },
            now,
        );
        state.handle(Command::SetModelKind(ModelKind::GradientBoosting), now);

        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        let effects = state.handle(Command::SelectionMade { polygon }, now);
        assert!(matches!(effects[0], Effect::StartSelection { label: 4, .. }));

        match &state.handle(Command::FitRequested, now)[0] {
            Effect::StartFit(request) => {
                assert_eq!(request.kind, ModelKind::GradientBoosting);
                assert!(request.selection.is_enabled("skimage"));
                assert!(request.selection.is_enabled("tomotwin"));
            }
            other => panic!("unexpected effect {other:?}"),
        }
    }
}
