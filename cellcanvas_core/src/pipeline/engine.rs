//! The pipeline engine: drives [`ControlState`] and runs its effects.
//!
//! The owner of a [`Pipeline`] is the control thread. Fit, Predict,
//! BackgroundEstimate, Embedding and Selection jobs run on named worker
//! threads and report back through channels; their completions are fed into
//! the state machine on the next [`Pipeline::submit`], [`Pipeline::tick`] or
//! [`Pipeline::wait_idle`].

use std::mem;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cellcanvas_shared::{ClassDistribution, Polygon};

use crate::config::CanvasConfig;
use crate::embedding::Embedding;
use crate::error::{CanvasError, CanvasResult};
use crate::jobs::{JobKind, JobOutcome};
use crate::learner::TrainedModel;
use crate::logging::{JobLog, JobLogEntry};
use crate::volume::{Label, VolumeStore};

use super::command::{Command, Completion, Effect, PaintEvent, PipelineEvent};
use super::state::ControlState;
use super::tasks::{self, JobContext, Outbox, Shared};

pub struct Pipeline {
    shared: Arc<Shared>,
    state: ControlState,
    outbox: Outbox,
    events: Receiver<PipelineEvent>,
    completions: Receiver<Completion>,
    workers: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn VolumeStore>, config: CanvasConfig) -> CanvasResult<Self> {
        config.classifier.validate()?;
        config.background.validate()?;

        let job_log = config
            .logging
            .job_log
            .as_ref()
            .map(JobLog::create)
            .transpose()?;

        let (event_tx, events) = mpsc::channel();
        let (completion_tx, completions) = mpsc::channel();
        let state = ControlState::new(&config);

        tracing::info!(
            shape = %store.shape(),
            sources = ?config.features.names().collect::<Vec<_>>(),
            model = %config.classifier.kind,
            "pipeline ready"
        );

        Ok(Self {
            shared: Arc::new(Shared::new(store, config, job_log)),
            state,
            outbox: Outbox {
                events: event_tx,
                completions: completion_tx,
            },
            events,
            completions,
            workers: Vec::new(),
        })
    }

    pub fn store(&self) -> &Arc<dyn VolumeStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.shared.config
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// The active model, if any fit has been published.
    pub fn model(&self) -> Option<Arc<TrainedModel>> {
        self.shared.model.get()
    }

    pub fn model_generation(&self) -> Option<u64> {
        self.shared.model.generation()
    }

    pub fn embedding(&self) -> Option<Arc<Embedding>> {
        self.shared.embedding.get()
    }

    /// Painted label distribution as of the last refresh.
    pub fn label_distribution(&self) -> ClassDistribution {
        self.shared.label_stats.read().clone()
    }

    /// Prediction distribution as of the last prediction or refresh.
    pub fn prediction_distribution(&self) -> ClassDistribution {
        self.shared.prediction_stats.read().clone()
    }

    pub fn submit(&mut self, command: Command) -> CanvasResult<()> {
        self.submit_at(command, Instant::now())
    }

    /// Handle `command` as if it arrived at `now`.
    ///
    /// Requests that cannot run in the current state (predict without a
    /// model, selection without an embedding) are rejected here and reported
    /// as `JobFailed`.
    pub fn submit_at(&mut self, command: Command, now: Instant) -> CanvasResult<()> {
        self.pump(now)?;
        self.precheck(&command)?;
        let effects = self.state.handle(command, now);
        self.run_effects(effects)
    }

    pub fn tick(&mut self) -> CanvasResult<()> {
        self.tick_at(Instant::now())
    }

    /// Process finished jobs and fire the refresh cascade if it is due.
    pub fn tick_at(&mut self, now: Instant) -> CanvasResult<()> {
        self.pump(now)?;
        let effects = self.state.tick(now);
        self.run_effects(effects)
    }

    pub fn paint(&mut self, strokes: Vec<([usize; 3], Label)>) -> CanvasResult<()> {
        self.submit(Command::Paint(PaintEvent::new(strokes)))
    }

    pub fn request_fit(&mut self) -> CanvasResult<()> {
        self.submit(Command::FitRequested)
    }

    pub fn request_predict(&mut self) -> CanvasResult<()> {
        self.submit(Command::PredictRequested)
    }

    pub fn request_background_estimate(&mut self) -> CanvasResult<()> {
        self.submit(Command::BackgroundEstimateRequested)
    }

    pub fn request_selection(&mut self, polygon: Polygon) -> CanvasResult<()> {
        self.submit(Command::SelectionMade { polygon })
    }

    /// Cancel the running job of `kind`; its result will be discarded.
    pub fn cancel(&self, kind: JobKind) -> bool {
        self.shared.slots.get(kind).cancel()
    }

    pub fn next_event(&self, timeout: Duration) -> Option<PipelineEvent> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every event published so far and not yet taken.
    pub fn drain_events(&self) -> Vec<PipelineEvent> {
        self.events.try_iter().collect()
    }

    /// Block until no job is running, including jobs chained off completions.
    pub fn wait_idle(&mut self) -> CanvasResult<()> {
        loop {
            self.pump(Instant::now())?;
            let workers = mem::take(&mut self.workers);
            if workers.is_empty() {
                return Ok(());
            }
            join_all(workers);
        }
    }

    /// Cancel everything and join the workers.
    pub fn shutdown(&mut self) {
        self.shared.slots.cancel_all();
        join_all(mem::take(&mut self.workers));
        tracing::info!("pipeline shut down");
    }

    fn pump(&mut self, now: Instant) -> CanvasResult<()> {
        while let Ok(completion) = self.completions.try_recv() {
            let effects = self.state.handle(Command::Completed(completion), now);
            self.run_effects(effects)?;
        }
        Ok(())
    }

    fn precheck(&self, command: &Command) -> CanvasResult<()> {
        let (kind, missing) = match command {
            Command::PredictRequested if self.shared.model.is_empty() => {
                (JobKind::Predict, CanvasError::NoModelAvailable)
            }
            Command::SelectionMade { .. } if self.shared.embedding.is_empty() => {
                (JobKind::Selection, CanvasError::NoProjection)
            }
            _ => return Ok(()),
        };

        let generation = self.shared.slots.get(kind).generation();
        tracing::warn!(%kind, error = %missing, "request rejected");
        if let Some(log) = &self.shared.job_log {
            let entry = JobLogEntry::new(kind, generation, JobOutcome::Failed, 0)
                .with_detail(missing.to_string());
            if let Err(err) = log.append(&entry) {
                tracing::warn!(error = %err, "job log write failed");
            }
        }
        let _ = self.outbox.events.send(PipelineEvent::JobFailed {
            kind,
            generation,
            error: missing.to_string(),
        });
        Err(missing)
    }

    fn run_effects(&mut self, effects: Vec<Effect>) -> CanvasResult<()> {
        for effect in effects {
            match effect {
                Effect::ApplyPaint(paint) => {
                    let painted = self.shared.store.paint(&paint.strokes)?;
                    tracing::debug!(painted, "paint applied");
                }
                Effect::StartFit(request) => {
                    self.spawn(JobKind::Fit, move |ctx| tasks::run_fit(ctx, request))?
                }
                Effect::StartPredict => self.spawn(JobKind::Predict, tasks::run_predict)?,
                Effect::StartBackgroundEstimate { selection } => self
                    .spawn(JobKind::BackgroundEstimate, move |ctx| {
                        tasks::run_background(ctx, selection)
                    })?,
                Effect::StartSelection { polygon, label } => self
                    .spawn(JobKind::Selection, move |ctx| {
                        tasks::run_selection(ctx, polygon, label)
                    })?,
                Effect::RebuildEmbedding { selection } => self
                    .spawn(JobKind::Embedding, move |ctx| {
                        tasks::run_embedding(ctx, selection)
                    })?,
                Effect::RefreshStats => self.refresh_stats()?,
            }
        }
        Ok(())
    }

    fn spawn<F>(&mut self, kind: JobKind, job: F) -> CanvasResult<()>
    where
        F: FnOnce(JobContext) + Send + 'static,
    {
        let ticket = self.shared.slots.get(kind).begin();
        tracing::info!(%kind, generation = ticket.generation, "job started");

        let ctx = JobContext {
            shared: Arc::clone(&self.shared),
            outbox: self.outbox.clone(),
            ticket,
            started: Instant::now(),
        };
        let handle = thread::Builder::new()
            .name(format!("cellcanvas-{kind}"))
            .spawn(move || job(ctx))?;

        self.workers.retain(|worker| !worker.is_finished());
        self.workers.push(handle);
        Ok(())
    }

    fn refresh_stats(&mut self) -> CanvasResult<()> {
        let region = self.shared.whole_region();
        let labels =
            ClassDistribution::from_labels(self.shared.store.read_labels(&region)?.iter().copied());
        let predictions = ClassDistribution::from_labels(
            self.shared.store.read_predictions(&region)?.iter().copied(),
        );

        *self.shared.label_stats.write() = labels.clone();
        *self.shared.prediction_stats.write() = predictions.clone();
        tracing::debug!(
            labeled = labels.labeled_count(),
            predicted = predictions.labeled_count(),
            "distributions refreshed"
        );

        let _ = self.outbox.events.send(PipelineEvent::DistributionsRefreshed {
            labels,
            predictions,
        });
        Ok(())
    }
}

fn join_all(workers: Vec<JoinHandle<()>>) {
    for worker in workers {
        let name = worker.thread().name().map(str::to_owned);
        if worker.join().is_err() {
            tracing::error!(thread = ?name, "worker panicked");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::MemoryStore;
    use ndarray::{Array3, Array4};

    fn pipeline() -> Pipeline {
        let features = Array4::from_shape_fn((1, 2, 4, 1), |(_, _, x, _)| x as f32);
        let store = MemoryStore::new(Array3::zeros((1, 2, 4)))
            .with_feature_source("tomotwin", features)
            .unwrap();
        Pipeline::new(Arc::new(store), CanvasConfig::default()).unwrap()
    }

    #[test]
    fn predict_without_model_is_rejected() {
        let mut pipeline = pipeline();
        let err = pipeline.request_predict().unwrap_err();
        assert!(matches!(err, CanvasError::NoModelAvailable));
        assert!(matches!(
            pipeline.drain_events().as_slice(),
            [PipelineEvent::JobFailed {
                kind: JobKind::Predict,
                ..
            }]
        ));
    }

    #[test]
    fn selection_without_embedding_is_rejected() {
        let mut pipeline = pipeline();
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
        assert!(matches!(
            pipeline.request_selection(polygon),
            Err(CanvasError::NoProjection)
        ));
    }

    #[test]
    fn fit_without_labels_is_skipped() {
        let mut pipeline = pipeline();
        pipeline.request_fit().unwrap();
        pipeline.wait_idle().unwrap();

        let events = pipeline.drain_events();
        assert!(matches!(
            events.as_slice(),
            [PipelineEvent::JobSkipped {
                kind: JobKind::Fit,
                generation: 1,
                ..
            }]
        ));
        assert!(pipeline.model().is_none());
    }

    #[test]
    fn paint_refreshes_distributions_after_debounce() {
        let mut pipeline = pipeline();
        let t0 = Instant::now();
        pipeline
            .submit_at(Command::Paint(PaintEvent::brush([[0, 0, 0]], 2)), t0)
            .unwrap();
        pipeline.tick_at(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(pipeline.label_distribution().total(), 0);

        pipeline.tick_at(t0 + Duration::from_secs(2)).unwrap();
        let labels = pipeline.label_distribution();
        assert_eq!(labels.total(), 8);
        assert_eq!(labels.count(2), 1);
        pipeline.wait_idle().unwrap();
    }
}
