//! Orientation & Quality Gate (C5, SPEC_FULL.md §4.5).

use crate::model::{FaceRecord, OrientationSummary, OrientationVerdict, RejectionReason, SimilarityAnalysis};
use crate::similarity::dominant_cluster;

pub struct GateThresholds {
    pub max_abs_yaw: f64,
    pub max_abs_pitch: f64,
    pub max_abs_roll: f64,
    pub similarity_gate_threshold: f64,
}

pub struct GateResult {
    pub verdicts: Vec<OrientationVerdict>,
    pub summary: OrientationSummary,
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

/// Similarity of one face's embedding to the members of the dominant cluster
/// (excluding itself). Falls back to the face's similarity to the batch-wide
/// reference embedding when there is no meaningful cluster structure yet
/// (single face, or every face landed as noise).
fn similarity_to_dominant(
    face_index: usize,
    similarity: &SimilarityAnalysis,
    dominant_label: Option<i32>,
) -> f64 {
    let Some(label) = dominant_label else {
        return similarity
            .per_face_similarity_to_reference
            .get(face_index)
            .copied()
            .unwrap_or(0.0);
    };

    let members: Vec<usize> = similarity
        .clusters
        .labels
        .iter()
        .enumerate()
        .filter(|(i, &l)| l == label && *i != face_index)
        .map(|(i, _)| i)
        .collect();

    if members.is_empty() {
        return similarity
            .per_face_similarity_to_reference
            .get(face_index)
            .copied()
            .unwrap_or(0.0);
    }

    let sum: f64 = members
        .iter()
        .filter_map(|&m| similarity.pairwise_matrix.get(face_index).and_then(|row| row.get(m)))
        .sum();
    sum / members.len() as f64
}

pub fn gate(
    faces_with_embeddings: &[&FaceRecord],
    similarity: &SimilarityAnalysis,
    thresholds: &GateThresholds,
) -> GateResult {
    let dominant_label = dominant_cluster(&similarity.clusters);

    let mut verdicts = Vec::with_capacity(faces_with_embeddings.len());
    let mut yaws = Vec::new();
    let mut pitches = Vec::new();
    let mut rolls = Vec::new();
    let mut similarities = Vec::new();
    let mut accepted_count = 0usize;

    for (index, face) in faces_with_embeddings.iter().enumerate() {
        let pose = face.head_pose;
        let orientation_ok = match pose {
            Some(p) => {
                p.yaw.abs() <= thresholds.max_abs_yaw
                    && p.pitch.abs() <= thresholds.max_abs_pitch
                    && p.roll.abs() <= thresholds.max_abs_roll
            }
            None => false,
        };

        let sim = similarity_to_dominant(index, similarity, dominant_label);
        let similarity_ok = sim >= thresholds.similarity_gate_threshold;

        if let Some(p) = pose {
            yaws.push(p.yaw);
            pitches.push(p.pitch);
            rolls.push(p.roll);
        }
        similarities.push(sim);

        let accepted = orientation_ok && similarity_ok;
        let rejection_reason = if accepted {
            None
        } else if !orientation_ok {
            Some(RejectionReason::OrientationOutOfRange)
        } else {
            Some(RejectionReason::LowSimilarity)
        };

        if accepted {
            accepted_count += 1;
        }

        verdicts.push(OrientationVerdict {
            face_id: face.face_id.clone(),
            yaw: pose.map(|p| p.yaw),
            pitch: pose.map(|p| p.pitch),
            roll: pose.map(|p| p.roll),
            orientation_ok,
            similarity_ok,
            accepted,
            rejection_reason,
        });
    }

    let (mean_yaw, stdev_yaw) = mean_std(&yaws);
    let (mean_pitch, stdev_pitch) = mean_std(&pitches);
    let (mean_roll, stdev_roll) = mean_std(&rolls);
    let average_similarity = if similarities.is_empty() {
        0.0
    } else {
        similarities.iter().sum::<f64>() / similarities.len() as f64
    };
    let acceptance_ratio = if verdicts.is_empty() {
        0.0
    } else {
        accepted_count as f64 / verdicts.len() as f64
    };

    GateResult {
        verdicts,
        summary: OrientationSummary {
            acceptance_ratio,
            mean_yaw,
            stdev_yaw,
            mean_pitch,
            stdev_pitch,
            mean_roll,
            stdev_roll,
            average_similarity,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, ClusterAssignment, HeadPose, IdentityAssessment, Quality};

    fn face(id: &str, yaw: f64, pitch: f64, roll: f64) -> FaceRecord {
        FaceRecord {
            face_id: id.to_string(),
            image_id: id.to_string(),
            image_index: 0,
            bbox: BBox::default(),
            embedding: vec![1.0, 0.0],
            landmarks_68: None,
            landmarks_dense: None,
            head_pose: Some(HeadPose { yaw, pitch, roll }),
            quality: Quality::default(),
            confidence: 1.0,
            detection_model: "test".to_string(),
            error: None,
        }
    }

    fn default_thresholds() -> GateThresholds {
        GateThresholds { max_abs_yaw: 25.0, max_abs_pitch: 20.0, max_abs_roll: 30.0, similarity_gate_threshold: 0.45 }
    }

    #[test]
    fn accepts_frontal_face_with_good_similarity() {
        let f = face("0_0", 0.0, 0.0, 0.0);
        let faces = vec![&f];
        let similarity = SimilarityAnalysis {
            pairwise_matrix: vec![vec![1.0]],
            reference_embedding: vec![1.0, 0.0],
            per_face_similarity_to_reference: vec![0.9],
            same_person_confidence: 1.0,
            identity_assessment: IdentityAssessment::InsufficientData,
            clusters: ClusterAssignment::default(),
            error: None,
        };
        let result = gate(&faces, &similarity, &default_thresholds());
        assert!(result.verdicts[0].accepted);
    }

    #[test]
    fn rejects_extreme_yaw() {
        let f = face("0_0", 80.0, 0.0, 0.0);
        let faces = vec![&f];
        let similarity = SimilarityAnalysis {
            pairwise_matrix: vec![vec![1.0]],
            reference_embedding: vec![1.0, 0.0],
            per_face_similarity_to_reference: vec![0.9],
            same_person_confidence: 1.0,
            identity_assessment: IdentityAssessment::InsufficientData,
            clusters: ClusterAssignment::default(),
            error: None,
        };
        let result = gate(&faces, &similarity, &default_thresholds());
        assert!(!result.verdicts[0].accepted);
        assert_eq!(result.verdicts[0].rejection_reason, Some(RejectionReason::OrientationOutOfRange));
    }
}
