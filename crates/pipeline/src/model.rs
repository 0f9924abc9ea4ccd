//! The data model threaded through the pipeline (§3). Every entity here is
//! owned by exactly one stage; the orchestrator assembles the terminal
//! [`PipelineState`] from each stage's output rather than letting stages
//! mutate each other's sections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    Accepted,
    Duplicate,
    Dropped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceInfo {
    pub status: ComplianceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_pointer: Option<String>,
}

impl ComplianceInfo {
    pub fn accepted() -> Self {
        Self { status: ComplianceStatus::Accepted, reason: None, registry_pointer: None }
    }

    pub fn dropped(reason: impl Into<String>, pointer: Option<String>) -> Self {
        Self {
            status: ComplianceStatus::Dropped,
            reason: Some(reason.into()),
            registry_pointer: pointer,
        }
    }

    pub fn duplicate(reason: impl Into<String>, pointer: Option<String>) -> Self {
        Self {
            status: ComplianceStatus::Duplicate,
            reason: Some(reason.into()),
            registry_pointer: pointer,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self { status: ComplianceStatus::Error, reason: Some(reason.into()), registry_pointer: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationData {
    pub raw: serde_json::Value,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub file_size: u64,
    pub sha256: String,
    pub md5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_hash: Option<String>,
    #[serde(default)]
    pub exif: serde_json::Value,
    #[serde(default)]
    pub device_info: DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_info: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_data: Option<LocationData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_error: Option<String>,
    #[serde(default)]
    pub social_media_indicators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brightness_mean: Option<f64>,
    pub credibility_score: f64,
    #[serde(default)]
    pub credibility_factors: Vec<String>,
}

/// One input byte blob's full journey through the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedImage {
    pub id: String,
    pub index: usize,
    /// Decoded, orientation-normalized raster. Never serialized — it is
    /// working memory for later stages, not part of the reviewer-facing output.
    #[serde(skip)]
    pub decoded: Option<image::DynamicImage>,
    pub metadata: ImageMetadata,
    pub compliance: ComplianceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BBox {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Intersection-over-union against another box.
    pub fn iou(&self, other: &BBox) -> f64 {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);

        let intersection = if right > left && bottom > top {
            (right - left) * (bottom - top)
        } else {
            0.0
        };

        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Quality {
    pub blur_variance: f64,
    pub brightness: f64,
    pub contrast: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub face_id: String,
    pub image_id: String,
    pub image_index: usize,
    pub bbox: BBox,
    /// Fixed-dimension embedding, or empty when extraction failed — never a
    /// foreign-dimension vector (§3 invariant).
    pub embedding: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks_68: Option<Vec<(f64, f64)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks_dense: Option<Vec<(f64, f64, f64)>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_pose: Option<HeadPose>,
    pub quality: Quality,
    pub confidence: f64,
    pub detection_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityAssessment {
    SamePersonHigh,
    SamePersonModerate,
    DifferentPeople,
    InsufficientData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterAssignment {
    /// One label per face in the same order as the flattened face list; `-1` is noise.
    pub labels: Vec<i32>,
    pub cluster_count: usize,
    pub noise_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityAnalysis {
    pub pairwise_matrix: Vec<Vec<f64>>,
    pub reference_embedding: Vec<f32>,
    pub per_face_similarity_to_reference: Vec<f64>,
    pub same_person_confidence: f64,
    pub identity_assessment: IdentityAssessment,
    pub clusters: ClusterAssignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimilarityAnalysis {
    pub fn insufficient_data() -> Self {
        Self {
            pairwise_matrix: Vec::new(),
            reference_embedding: Vec::new(),
            per_face_similarity_to_reference: Vec::new(),
            same_person_confidence: 0.0,
            identity_assessment: IdentityAssessment::InsufficientData,
            clusters: ClusterAssignment::default(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    NoFaceDetected,
    OrientationOutOfRange,
    LowSimilarity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrientationVerdict {
    pub face_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,
    pub orientation_ok: bool,
    pub similarity_ok: bool,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectionReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrientationSummary {
    pub acceptance_ratio: f64,
    pub mean_yaw: f64,
    pub stdev_yaw: f64,
    pub mean_pitch: f64,
    pub stdev_pitch: f64,
    pub mean_roll: f64,
    pub stdev_roll: f64,
    pub average_similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatedFrame {
    pub image_id: String,
    pub mask_hash: String,
    pub facial_region: BBox,
    #[serde(skip)]
    pub mask_image: Option<image::DynamicImage>,
    #[serde(skip)]
    pub tracking_points_image: Option<image::DynamicImage>,
    pub compliance: ComplianceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedLandmarkCloud {
    pub points: Vec<[f64; 3]>,
    pub per_point_confidence: Vec<f64>,
    pub per_point_depth: Vec<f64>,
    pub per_point_color: Vec<[u8; 3]>,
    pub source_frame_count: usize,
    pub original_point_count: usize,
    pub compression_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceMesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPointer {
    pub center: [f64; 3],
    pub landmark: [f64; 3],
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Final4DModel {
    pub facial_points: Vec<[f64; 3]>,
    pub surface_mesh: SurfaceMesh,
    pub detection_pointers: Vec<DetectionPointer>,
    pub confidence_score: f64,
    pub facial_geometry_hash: String,
    pub biometric_template: String,
    pub model_hash: String,
    pub confidence_distribution: ConfidenceDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerImageAnomalies {
    pub image_id: String,
    pub anomalies: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalAnomalies {
    pub device_inconsistencies: Vec<String>,
    pub timestamp_inconsistencies: Vec<String>,
    pub isolated_gps: Vec<String>,
    pub brightness_outliers: Vec<String>,
    pub hash_duplicates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OSINTAnomalies {
    pub per_image: Vec<PerImageAnomalies>,
    pub global: GlobalAnomalies,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseSearchHit {
    pub engine: String,
    pub url: String,
    pub domain: String,
    pub verified: bool,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseImageResult {
    pub image_id: String,
    pub engines: Vec<String>,
    pub total_hits: usize,
    pub unique_domains: usize,
    pub hits: Vec<ReverseSearchHit>,
    pub verified_ratio: f64,
    /// `None` when reverse search was disabled or never ran; `Some(0.0)` when
    /// the driver ran and found nothing (§4.10 open-question resolution).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength_score: Option<f64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReverseImageResult {
    pub fn disabled_for(image_id: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            engines: Vec::new(),
            total_hits: 0,
            unique_domains: 0,
            hits: Vec::new(),
            verified_ratio: 0.0,
            strength_score: None,
            disabled: true,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAssessment {
    HighConfidenceIdentification,
    ModerateConfidence,
    LowConfidenceOrSynthetic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalQuality {
    pub quality_score: f64,
    pub pose_variation_score: f64,
    pub embedding_consistency: f64,
    pub liveness_confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceSummary {
    pub identity_confidence: f64,
    pub osint_findings: Vec<String>,
    pub technical_quality: TechnicalQuality,
    pub risk_assessment: RiskAssessment,
    pub recommendations: Vec<String>,
    pub average_metadata_credibility: f64,
    pub duplicate_hashes_detected: bool,
    pub anomalies_summary: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReverseSearchStats {
    pub successes: usize,
    pub errors: usize,
    pub disabled: usize,
}

/// The terminal, sanitized artifact written exactly once by the orchestrator (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub user_id: String,
    pub processing_start: DateTime<Utc>,
    pub processing_time: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub images_processed: Vec<IngestedImage>,
    pub faces_detected: Vec<FaceRecord>,
    pub osint_metadata: Vec<ImageMetadata>,
    pub osint_anomalies: OSINTAnomalies,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_analysis: Option<SimilarityAnalysis>,
    pub orientation_summary: OrientationSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks_3d: Option<MergedLandmarkCloud>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_4d: Option<Final4DModel>,
    pub reverse_image_results: Vec<ReverseImageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intelligence_summary: Option<IntelligenceSummary>,
    pub osint_metrics: ReverseSearchStats,
    pub status: String,
}
