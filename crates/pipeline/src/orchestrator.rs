//! Pipeline Orchestrator (C12, SPEC_FULL.md §5/§6).
//!
//! `Arc`-wrapped, `Clone`, cancellation-aware — the same shape as
//! `ai-service/src/state.rs`'s `AiServiceState`/`AiServiceStateInner` split,
//! with `tokio_util::sync::CancellationToken` checked between stages instead
//! of inside a renewal loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::anomalies;
use crate::config::PipelineConfig;
use crate::decode;
use crate::detect::FaceDetectionStage;
use crate::error::PipelineError;
use crate::isolate;
use crate::merge::{self, SourcePoint};
use crate::model::{
    ComplianceInfo, FaceRecord, IngestedImage, OrientationSummary, OrientationVerdict, PipelineState,
    RejectionReason, ReverseImageResult,
};
use crate::orientation::{self, GateThresholds};
use crate::refine;
use crate::reverse_search::{self, NullReverseSearchDriver, ReverseSearchDriver, ReverseSearchQuery};
use crate::similarity;
use provenance::{ProvenanceRegistry, RegistryVerdict};
use telemetry::PIPELINE_METRICS;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StageStarted(&'static str),
    StageCompleted(&'static str),
    StageSkipped(&'static str),
    ImageProcessed { image_id: String, index: usize },
}

pub struct PipelineOrchestrator {
    inner: Arc<PipelineOrchestratorInner>,
}

struct PipelineOrchestratorInner {
    config: PipelineConfig,
    registry: ProvenanceRegistry,
    detection: FaceDetectionStage,
    reverse_driver: Arc<dyn ReverseSearchDriver>,
}

impl Clone for PipelineOrchestrator {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, registry: ProvenanceRegistry) -> Self {
        Self::with_reverse_driver(config, registry, Arc::new(NullReverseSearchDriver))
    }

    pub fn with_reverse_driver(
        config: PipelineConfig,
        registry: ProvenanceRegistry,
        reverse_driver: Arc<dyn ReverseSearchDriver>,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineOrchestratorInner {
                config,
                registry,
                detection: FaceDetectionStage::default(),
                reverse_driver,
            }),
        }
    }

    /// Run the full batch. Cancellation is cooperative: checked at each stage
    /// boundary, never mid-stage, so a cancelled run still returns a
    /// well-formed (if partial) [`PipelineState`] rather than a torn one.
    pub async fn process(
        &self,
        images: Vec<Vec<u8>>,
        user_id: String,
        cancel: CancellationToken,
        on_progress: impl Fn(ProgressEvent) + Send + Sync,
    ) -> PipelineState {
        let batch_start = Instant::now();
        let processing_start = Utc::now();
        let config = &self.inner.config;

        let mut state = PipelineState {
            user_id,
            processing_start,
            processing_time: 0.0,
            success: false,
            error: None,
            images_processed: Vec::new(),
            faces_detected: Vec::new(),
            osint_metadata: Vec::new(),
            osint_anomalies: Default::default(),
            similarity_analysis: None,
            orientation_summary: OrientationSummary::default(),
            landmarks_3d: None,
            model_4d: None,
            reverse_image_results: Vec::new(),
            intelligence_summary: None,
            osint_metrics: Default::default(),
            status: "running".to_string(),
        };

        if let Err(e) = self.run_stages(images, &cancel, &on_progress, &mut state).await {
            state.success = false;
            state.status = "error".to_string();
            state.error = Some(e.to_string());
            warn!(error = %e, "pipeline run failed");
        } else if cancel.is_cancelled() {
            state.status = "cancelled".to_string();
        } else {
            state.success = true;
            state.status = "completed".to_string();
        }

        state.processing_time = batch_start.elapsed().as_secs_f64();
        PIPELINE_METRICS.record_batch_duration(state.processing_time);
        state
    }

    async fn run_stages(
        &self,
        images: Vec<Vec<u8>>,
        cancel: &CancellationToken,
        on_progress: &(impl Fn(ProgressEvent) + Send + Sync),
        state: &mut PipelineState,
    ) -> Result<(), PipelineError> {
        let config = &self.inner.config;
        let registry = &self.inner.registry;

        // --- Stage: decode + provenance gate ---
        on_progress(ProgressEvent::StageStarted("decode"));
        let stage_start = Instant::now();
        let mut seen_hashes = HashSet::new();
        let mut decoded_images = Vec::with_capacity(images.len());

        for (index, bytes) in images.into_iter().enumerate() {
            let image_id = format!("img_{index:03}");
            let ingested = match decode::extract(&bytes, &seen_hashes) {
                Ok(decoded) => {
                    seen_hashes.insert(decoded.metadata.sha256.clone());
                    let check = registry
                        .check_image(
                            &decoded.metadata.sha256,
                            decoded.metadata.perceptual_hash.as_deref(),
                            decoded.metadata.watermark_hash.as_deref(),
                        )
                        .await;

                    let (compliance, keep) = match check.status {
                        RegistryVerdict::Allowed => {
                            registry
                                .register_image(
                                    &decoded.metadata.sha256,
                                    serde_json::json!({ "image_id": image_id }),
                                    decoded.metadata.perceptual_hash.as_deref(),
                                    decoded.metadata.watermark_hash.as_deref(),
                                )
                                .await;
                            PIPELINE_METRICS.record_image_outcome("accepted");
                            (ComplianceInfo::accepted(), true)
                        }
                        RegistryVerdict::Duplicate => {
                            PIPELINE_METRICS.record_image_outcome("duplicate");
                            (ComplianceInfo::duplicate("duplicate image", Some(decoded.metadata.sha256.clone())), false)
                        }
                        _ => {
                            PIPELINE_METRICS.record_image_outcome("dropped");
                            (
                                ComplianceInfo::dropped(
                                    format!("{:?}", check.status),
                                    Some(decoded.metadata.sha256.clone()),
                                ),
                                false,
                            )
                        }
                    };

                    let decoded_pixels = if keep { Some(decoded.pixels) } else { None };
                    IngestedImage {
                        id: image_id.clone(),
                        index,
                        decoded: decoded_pixels,
                        metadata: decoded.metadata,
                        compliance,
                        error: None,
                    }
                }
                Err(e) => {
                    PIPELINE_METRICS.record_image_outcome("error");
                    IngestedImage {
                        id: image_id.clone(),
                        index,
                        decoded: None,
                        metadata: Default::default(),
                        compliance: ComplianceInfo::error(e.clone()),
                        error: Some(e),
                    }
                }
            };

            on_progress(ProgressEvent::ImageProcessed { image_id, index });
            decoded_images.push(ingested);
        }
        PIPELINE_METRICS.record_stage_duration("decode", stage_start.elapsed().as_secs_f64());
        on_progress(ProgressEvent::StageCompleted("decode"));

        if cancel.is_cancelled() {
            state.images_processed = decoded_images;
            return Ok(());
        }

        // --- Stage: face detection ---
        on_progress(ProgressEvent::StageStarted("detect"));
        let stage_start = Instant::now();
        let mut faces = Vec::new();
        for image in &decoded_images {
            let Some(pixels) = image.decoded.as_ref() else { continue };
            let detected = self.inner.detection.detect_faces(&image.id, image.index, pixels);
            for face in &detected {
                PIPELINE_METRICS.record_faces_detected(&face.detection_model, 1);
            }
            faces.extend(detected);
        }
        PIPELINE_METRICS.record_stage_duration("detect", stage_start.elapsed().as_secs_f64());
        on_progress(ProgressEvent::StageCompleted("detect"));

        // --- Stage: similarity ---
        on_progress(ProgressEvent::StageStarted("similarity"));
        let face_refs: Vec<&FaceRecord> = faces.iter().collect();
        let similarity_analysis =
            similarity::analyze(&face_refs, config.cluster_epsilon, config.cluster_min_samples);
        on_progress(ProgressEvent::StageCompleted("similarity"));

        if cancel.is_cancelled() {
            state.images_processed = decoded_images;
            state.faces_detected = faces;
            state.similarity_analysis = Some(similarity_analysis);
            return Ok(());
        }

        // --- Stage: orientation/quality gate ---
        on_progress(ProgressEvent::StageStarted("orientation"));
        let thresholds = GateThresholds {
            max_abs_yaw: config.max_abs_yaw,
            max_abs_pitch: config.max_abs_pitch,
            max_abs_roll: config.max_abs_roll,
            similarity_gate_threshold: config.similarity_gate_threshold,
        };
        let mut gate_result = orientation::gate(&face_refs, &similarity_analysis, &thresholds);
        // Images with no detected face get a manual-review verdict rather than
        // silently vanishing from the orientation output (§4.5).
        for image in &decoded_images {
            if image.decoded.is_none() {
                continue;
            }
            if faces.iter().any(|f| f.image_id == image.id) {
                continue;
            }
            gate_result.verdicts.push(OrientationVerdict {
                face_id: format!("{}_none", image.index),
                yaw: None,
                pitch: None,
                roll: None,
                orientation_ok: false,
                similarity_ok: false,
                accepted: false,
                rejection_reason: Some(RejectionReason::NoFaceDetected),
            });
        }
        on_progress(ProgressEvent::StageCompleted("orientation"));

        // --- Stage: facial isolation ---
        on_progress(ProgressEvent::StageStarted("isolate"));
        let stage_start = Instant::now();
        let mut isolated_points: Vec<SourcePoint> = Vec::new();
        let mut isolated_image_refs: Vec<image::DynamicImage> = Vec::new();

        for (face, verdict) in faces.iter().zip(gate_result.verdicts.iter()) {
            if !verdict.accepted {
                continue;
            }
            let Some(image) = decoded_images.iter().find(|i| i.id == face.image_id) else { continue };
            let Some(pixels) = image.decoded.as_ref() else { continue };

            if isolate::isolate(&face.image_id, pixels, face, registry).await.is_none() {
                continue;
            }

            if let Some(dense) = &face.landmarks_dense {
                let frame_index = isolated_image_refs.len();
                isolated_image_refs.push(pixels.clone());
                for &(x, y, z) in dense {
                    isolated_points.push(SourcePoint { x, y, z, frame_image: Some(frame_index) });
                }
            }
        }
        PIPELINE_METRICS.record_stage_duration("isolate", stage_start.elapsed().as_secs_f64());
        on_progress(ProgressEvent::StageCompleted("isolate"));

        // --- Stage: 3D landmark merge + 4D model refinement ---
        let (landmarks_3d, model_4d) = if config.disable_flags.disable_3d {
            on_progress(ProgressEvent::StageSkipped("merge_refine"));
            (None, None)
        } else {
            on_progress(ProgressEvent::StageStarted("merge_refine"));
            let cloud =
                merge::merge(&isolated_points, &isolated_image_refs, config.landmark_cluster_threshold_px);
            let smoothing_iterations =
                if config.disable_flags.disable_smoothing { 0 } else { config.smoothing_iterations };
            let model = refine::refine(&cloud, registry, smoothing_iterations).await;
            on_progress(ProgressEvent::StageCompleted("merge_refine"));
            (Some(cloud), Some(model))
        };

        // --- Stage: OSINT anomaly detection ---
        on_progress(ProgressEvent::StageStarted("anomalies"));
        let metadata: Vec<_> = decoded_images.iter().map(|i| i.metadata.clone()).collect();
        let image_ids: Vec<_> = decoded_images.iter().map(|i| i.id.clone()).collect();
        let osint_anomalies = anomalies::detect(&metadata, &image_ids);
        on_progress(ProgressEvent::StageCompleted("anomalies"));

        // --- Stage: reverse image search ---
        let mut reverse_results = Vec::with_capacity(decoded_images.len());
        if config.disable_flags.disable_reverse_search {
            on_progress(ProgressEvent::StageSkipped("reverse_search"));
            for image in &decoded_images {
                reverse_results.push(ReverseImageResult::disabled_for(image.id.clone()));
            }
            state.osint_metrics.disabled = decoded_images.len();
        } else {
            on_progress(ProgressEvent::StageStarted("reverse_search"));
            for image in &decoded_images {
                if image.decoded.is_none() {
                    continue;
                }
                let query = ReverseSearchQuery { image_id: image.id.clone(), engines: Vec::new() };
                let result =
                    reverse_search::search(self.inner.reverse_driver.as_ref(), &[], &query, false).await;
                if result.error.is_some() {
                    PIPELINE_METRICS.record_reverse_search("error");
                    state.osint_metrics.errors += 1;
                } else {
                    PIPELINE_METRICS.record_reverse_search("success");
                    state.osint_metrics.successes += 1;
                }
                reverse_results.push(result);
            }
            on_progress(ProgressEvent::StageCompleted("reverse_search"));
        }

        // --- Stage: intelligence synthesis ---
        on_progress(ProgressEvent::StageStarted("synthesize"));
        let intelligence_summary = crate::synthesize::synthesize(
            &faces,
            Some(&similarity_analysis),
            &gate_result.summary,
            &osint_anomalies,
            &metadata,
        );
        on_progress(ProgressEvent::StageCompleted("synthesize"));

        info!(
            images = decoded_images.len(),
            faces = faces.len(),
            "pipeline batch finished"
        );

        state.images_processed = decoded_images;
        state.faces_detected = faces;
        state.osint_metadata = metadata;
        state.osint_anomalies = osint_anomalies;
        state.similarity_analysis = Some(similarity_analysis);
        state.orientation_summary = gate_result.summary;
        state.landmarks_3d = landmarks_3d;
        state.model_4d = model_4d;
        state.reverse_image_results = reverse_results;
        state.intelligence_summary = Some(intelligence_summary);

        Ok(())
    }
}
