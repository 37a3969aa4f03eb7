//! Bodies of the background jobs and the shared publish protocol.

use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Instant;

use cellcanvas_shared::{ClassDistribution, Polygon};
use ndarray::{Array1, Array2, Array3};
use parking_lot::{Mutex, RwLock};

use crate::background::{BackgroundEstimator, BackgroundProposal};
use crate::config::CanvasConfig;
use crate::embedding::{Embedding, EmbeddingProjector, PlsProjector};
use crate::error::{CanvasError, CanvasResult};
use crate::features::{into_matrix, FeatureSelection, SampleExtractor};
use crate::jobs::{JobKind, JobOutcome, JobSlots, JobTicket, Published};
use crate::learner::{build_classifier, fit_model, TrainedModel};
use crate::logging::{JobLog, JobLogEntry};
use crate::selection::{InteractiveSelector, SelectionMask};
use crate::volume::{FeatureSource, Label, Region, VolumeStore};

use super::command::{Completion, FitRequest, PipelineEvent};

/// Whole-volume feature matrix of one source list.
struct FeatureCache {
    sources: Vec<String>,
    features: Arc<Array2<f32>>,
}

/// State shared between the control thread and the jobs.
pub(super) struct Shared {
    pub store: Arc<dyn VolumeStore>,
    pub config: CanvasConfig,
    pub slots: JobSlots,
    pub model: Published<TrainedModel>,
    pub embedding: Published<Embedding>,
    pub label_stats: RwLock<ClassDistribution>,
    pub prediction_stats: RwLock<ClassDistribution>,
    pub job_log: Option<JobLog>,
    feature_cache: Mutex<Option<FeatureCache>>,
}

fn source_names(sources: &[FeatureSource]) -> Vec<String> {
    sources.iter().map(|s| s.name.clone()).collect()
}

impl Shared {
    pub fn new(store: Arc<dyn VolumeStore>, config: CanvasConfig, job_log: Option<JobLog>) -> Self {
        Self {
            store,
            config,
            slots: JobSlots::default(),
            model: Published::new(),
            embedding: Published::new(),
            label_stats: RwLock::new(ClassDistribution::default()),
            prediction_stats: RwLock::new(ClassDistribution::default()),
            job_log,
            feature_cache: Mutex::new(None),
        }
    }

    pub fn whole_region(&self) -> Region {
        Region::whole(self.store.shape())
    }

    /// Whole-volume features of `sources`, from the cache when it matches.
    pub fn whole_features(&self, sources: &[FeatureSource]) -> CanvasResult<Arc<Array2<f32>>> {
        let names = source_names(sources);
        if let Some(cache) = self.feature_cache.lock().as_ref() {
            if cache.sources == names {
                return Ok(Arc::clone(&cache.features));
            }
        }

        let region = self.whole_region();
        let features = Arc::new(into_matrix(
            SampleExtractor::new(self.store.as_ref()).read_sources(sources, &region)?,
        )?);
        self.cache_features(names, Arc::clone(&features));
        Ok(features)
    }

    fn cache_features(&self, sources: Vec<String>, features: Arc<Array2<f32>>) {
        *self.feature_cache.lock() = Some(FeatureCache { sources, features });
    }

    pub fn has_cached_features(&self) -> bool {
        self.feature_cache.lock().is_some()
    }
}

/// Channels a job reports through.
#[derive(Clone)]
pub(super) struct Outbox {
    pub events: Sender<PipelineEvent>,
    pub completions: Sender<Completion>,
}

/// One running job.
pub(super) struct JobContext {
    pub shared: Arc<Shared>,
    pub outbox: Outbox,
    pub ticket: JobTicket,
    pub started: Instant,
}

impl JobContext {
    fn store(&self) -> &dyn VolumeStore {
        self.shared.store.as_ref()
    }

    /// Bail out early once superseded.
    fn checkpoint(&self) -> CanvasResult<()> {
        if self.ticket.is_cancelled() {
            Err(CanvasError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Publish `result` if the ticket is still current, then report.
    fn finish<T>(
        self,
        result: CanvasResult<T>,
        publish: impl FnOnce(&Shared, u64, T) -> CanvasResult<PipelineEvent>,
    ) {
        let kind = self.ticket.kind;
        let generation = self.ticket.generation;
        let slot = self.shared.slots.get(kind);

        let (outcome, event, detail) = match result {
            Ok(value) => {
                match slot.complete(&self.ticket, || publish(&self.shared, generation, value)) {
                    Some(Ok(event)) => (JobOutcome::Published, event, None),
                    Some(Err(err)) => failed(kind, generation, err),
                    None => discarded(kind, generation),
                }
            }
            Err(CanvasError::Cancelled) => {
                slot.release(&self.ticket);
                discarded(kind, generation)
            }
            Err(err) => {
                slot.release(&self.ticket);
                if err.is_expected() {
                    tracing::info!(%kind, generation, reason = %err, "job skipped");
                    let reason = err.to_string();
                    (
                        JobOutcome::Skipped,
                        PipelineEvent::JobSkipped {
                            kind,
                            generation,
                            reason: reason.clone(),
                        },
                        Some(reason),
                    )
                } else {
                    failed(kind, generation, err)
                }
            }
        };

        let elapsed_ms = self.started.elapsed().as_millis();
        if outcome == JobOutcome::Published {
            tracing::info!(%kind, generation, elapsed_ms, "job published");
        }
        if let Some(log) = &self.shared.job_log {
            let mut entry = JobLogEntry::new(kind, generation, outcome, elapsed_ms);
            if let Some(detail) = detail {
                entry = entry.with_detail(detail);
            }
            if let Err(err) = log.append(&entry) {
                tracing::warn!(path = %log.path().display(), error = %err, "job log write failed");
            }
        }

        // the receiving side may already be gone during shutdown
        let _ = self.outbox.events.send(event);
        let _ = self.outbox.completions.send(Completion {
            kind,
            generation,
            outcome,
        });
    }
}

fn failed(
    kind: JobKind,
    generation: u64,
    err: CanvasError,
) -> (JobOutcome, PipelineEvent, Option<String>) {
    tracing::error!(%kind, generation, error = %err, "job failed");
    let error = err.to_string();
    (
        JobOutcome::Failed,
        PipelineEvent::JobFailed {
            kind,
            generation,
            error: error.clone(),
        },
        Some(error),
    )
}

fn discarded(
    kind: JobKind,
    generation: u64,
) -> (JobOutcome, PipelineEvent, Option<String>) {
    tracing::warn!(%kind, generation, "stale result discarded");
    (
        JobOutcome::Discarded,
        PipelineEvent::JobDiscarded { kind, generation },
        None,
    )
}

pub(super) fn run_fit(ctx: JobContext, request: FitRequest) {
    let result = train(&ctx, &request);
    ctx.finish(result, |shared, generation, model| {
        let summary = model.summary();
        shared.model.publish(generation, Arc::new(model));
        Ok(PipelineEvent::ModelTrained {
            generation,
            summary,
        })
    });
}

fn train(ctx: &JobContext, request: &FitRequest) -> CanvasResult<TrainedModel> {
    let store = ctx.store();
    let batch = SampleExtractor::new(store).extract(&request.policy, &request.selection)?;
    ctx.checkpoint()?;

    let classifier = build_classifier(request.kind, &ctx.shared.config.classifier);
    let model = fit_model(classifier.as_ref(), &batch)?;

    if batch.region.is_whole(store.shape()) {
        let names = source_names(&batch.sources);
        ctx.shared.cache_features(names, Arc::new(batch.features));
    }
    Ok(model)
}

pub(super) fn run_predict(ctx: JobContext) {
    let result = predict_volume(&ctx);
    ctx.finish(result, |shared, generation, (volume, distribution)| {
        shared
            .store
            .write_predictions(&shared.whole_region(), volume.view())?;
        *shared.prediction_stats.write() = distribution.clone();
        Ok(PipelineEvent::PredictionWritten {
            generation,
            distribution,
        })
    });
}

fn predict_volume(ctx: &JobContext) -> CanvasResult<(Array3<Label>, ClassDistribution)> {
    let model = ctx.shared.model.get().ok_or(CanvasError::NoModelAvailable)?;
    let features = ctx.shared.whole_features(&model.sources)?;
    ctx.checkpoint()?;

    let labels = model.predict_labels(features.view())?;
    let distribution = ClassDistribution::from_labels(labels.iter().copied());

    let shape = ctx.store().shape();
    let volume = labels
        .into_shape(shape.dim())
        .map_err(|_| CanvasError::dimension_mismatch(shape.voxels(), 0, "prediction volume"))?;
    Ok((volume, distribution))
}

pub(super) fn run_embedding(ctx: JobContext, selection: FeatureSelection) {
    let result = build_embedding(&ctx, &selection);
    ctx.finish(result, |shared, generation, embedding| {
        let embedding = Arc::new(embedding);
        shared.embedding.publish(generation, Arc::clone(&embedding));
        Ok(PipelineEvent::EmbeddingRebuilt {
            generation,
            embedding,
        })
    });
}

fn build_embedding(ctx: &JobContext, selection: &FeatureSelection) -> CanvasResult<Embedding> {
    let store = ctx.store();
    let sources = selection.resolve(store)?;
    let labels = store.read_labels(&ctx.shared.whole_region())?;
    let labels = Array1::from_iter(labels.iter().copied());

    let features = ctx.shared.whole_features(&sources)?;
    ctx.checkpoint()?;

    let projector = PlsProjector::default();
    EmbeddingProjector::new(store, &projector).fit(sources, features.view(), labels.view())
}

pub(super) fn run_selection(ctx: JobContext, polygon: Polygon, label: Label) {
    let result = resolve_selection(&ctx, &polygon);
    ctx.finish(result, |shared, generation, mask: SelectionMask| {
        let outcome = InteractiveSelector::new(shared.store.as_ref()).apply(&mask, label)?;
        Ok(PipelineEvent::SelectionPainted {
            generation,
            outcome,
        })
    });
}

fn resolve_selection(ctx: &JobContext, polygon: &Polygon) -> CanvasResult<SelectionMask> {
    let embedding = ctx.shared.embedding.get();
    InteractiveSelector::new(ctx.store()).mask(embedding.as_deref(), polygon, &ctx.ticket.token)
}

pub(super) fn run_background(ctx: JobContext, selection: FeatureSelection) {
    let estimator = BackgroundEstimator::new(ctx.shared.config.background.clone());
    let result = propose_background(&ctx, &estimator, &selection);
    ctx.finish(result, |shared, generation, proposal: BackgroundProposal| {
        let painted = estimator.apply(shared.store.as_ref(), &proposal)?;
        Ok(PipelineEvent::BackgroundEstimated {
            generation,
            estimate: proposal.estimate,
            painted,
        })
    });
}

fn propose_background(
    ctx: &JobContext,
    estimator: &BackgroundEstimator,
    selection: &FeatureSelection,
) -> CanvasResult<BackgroundProposal> {
    let store = ctx.store();
    let sources = selection.resolve(store)?;
    let features = ctx.shared.whole_features(&sources)?;
    ctx.checkpoint()?;
    estimator.estimate(features.view(), store.shape())
}
