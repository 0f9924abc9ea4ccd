//! Intelligence Synthesizer (C11, SPEC_FULL.md §4.11).

use crate::model::{
    FaceRecord, GlobalAnomalies, ImageMetadata, IntelligenceSummary, OSINTAnomalies, OrientationSummary,
    RiskAssessment, SimilarityAnalysis, TechnicalQuality,
};

fn pose_variation_score(summary: &OrientationSummary) -> f64 {
    let spread = (summary.stdev_yaw + summary.stdev_pitch + summary.stdev_roll) / 3.0;
    (spread / 30.0).min(1.0)
}

fn embedding_consistency(similarity: Option<&SimilarityAnalysis>) -> f64 {
    similarity.map(|s| s.same_person_confidence).unwrap_or(0.0)
}

fn quality_score(faces: &[FaceRecord]) -> f64 {
    if faces.is_empty() {
        return 0.0;
    }
    let sum: f64 = faces.iter().map(|f| f.confidence).sum();
    sum / faces.len() as f64
}

fn osint_findings(anomalies: &OSINTAnomalies) -> Vec<String> {
    let GlobalAnomalies {
        device_inconsistencies,
        timestamp_inconsistencies,
        isolated_gps,
        brightness_outliers,
        hash_duplicates,
    } = &anomalies.global;

    let mut findings = Vec::new();
    if !device_inconsistencies.is_empty() {
        findings.push(format!("{} image(s) with a device mismatch", device_inconsistencies.len()));
    }
    if !timestamp_inconsistencies.is_empty() {
        findings.push(format!("{} image(s) with timestamp inconsistencies", timestamp_inconsistencies.len()));
    }
    if !isolated_gps.is_empty() {
        findings.push(format!("{} image(s) with anomalous GPS placement", isolated_gps.len()));
    }
    if !brightness_outliers.is_empty() {
        findings.push(format!("{} image(s) with brightness outliers", brightness_outliers.len()));
    }
    if !hash_duplicates.is_empty() {
        findings.push(format!("{} duplicate image(s) detected", hash_duplicates.len()));
    }
    findings
}

/// Fixed rule table over the eight conditions named in §4.11, in order,
/// after the leading risk-tier line.
fn recommendations(
    risk: RiskAssessment,
    average_metadata_credibility: f64,
    duplicate_hashes_detected: bool,
    global: &GlobalAnomalies,
    finding_count: usize,
    image_count: usize,
) -> Vec<String> {
    let mut recs = Vec::new();
    match risk {
        RiskAssessment::HighConfidenceIdentification => {
            recs.push("High-confidence same-person identification across submitted images.".to_string());
        }
        RiskAssessment::ModerateConfidence => {
            recs.push("Moderate confidence — consider requesting additional corroborating images.".to_string());
        }
        RiskAssessment::LowConfidenceOrSynthetic => {
            recs.push("Low confidence or possible synthetic content — manual review recommended.".to_string());
        }
    }
    if average_metadata_credibility < 0.5 {
        recs.push("Low average metadata credibility — treat source authenticity with caution.".to_string());
    }
    if duplicate_hashes_detected {
        recs.push("Duplicate image hashes detected within the batch — check for resubmission.".to_string());
    }
    if !global.device_inconsistencies.is_empty() {
        recs.push("Device inconsistencies detected across the batch — verify capture source.".to_string());
    }
    if !global.timestamp_inconsistencies.is_empty() {
        recs.push("Timestamp inconsistencies detected — review capture chronology.".to_string());
    }
    if !global.isolated_gps.is_empty() {
        recs.push("Isolated or widely separated GPS data detected — verify location claims.".to_string());
    }
    if !global.brightness_outliers.is_empty() {
        recs.push("Brightness outliers detected — inspect for lighting manipulation or compositing.".to_string());
    }
    if image_count < 3 {
        recs.push("Fewer than three images submitted — more images needed for a confident assessment.".to_string());
    }
    if finding_count == 0 {
        recs.push("No OSINT findings detected in this batch.".to_string());
    }
    recs
}

/// Compose the terminal intelligence summary from every upstream stage's output.
pub fn synthesize(
    faces: &[FaceRecord],
    similarity: Option<&SimilarityAnalysis>,
    orientation_summary: &OrientationSummary,
    anomalies: &OSINTAnomalies,
    metadata: &[ImageMetadata],
) -> IntelligenceSummary {
    let quality = quality_score(faces);
    let pose_variation = pose_variation_score(orientation_summary);
    let consistency = embedding_consistency(similarity);
    let liveness_confidence = 0.4 * quality + 0.3 * pose_variation + 0.3 * consistency;

    let same_person_confidence = similarity.map(|s| s.same_person_confidence).unwrap_or(0.0);
    let identity_confidence = (same_person_confidence + liveness_confidence) / 2.0;

    let findings = osint_findings(anomalies);
    let risk = if identity_confidence > 0.8 && findings.len() >= 3 {
        RiskAssessment::HighConfidenceIdentification
    } else if identity_confidence > 0.5 {
        RiskAssessment::ModerateConfidence
    } else {
        RiskAssessment::LowConfidenceOrSynthetic
    };

    let duplicate_hashes_detected = !anomalies.global.hash_duplicates.is_empty();
    let average_metadata_credibility = if metadata.is_empty() {
        0.0
    } else {
        metadata.iter().map(|m| m.credibility_score).sum::<f64>() / metadata.len() as f64
    };

    IntelligenceSummary {
        identity_confidence,
        osint_findings: findings.clone(),
        technical_quality: TechnicalQuality {
            quality_score: quality,
            pose_variation_score: pose_variation,
            embedding_consistency: consistency,
            liveness_confidence,
        },
        risk_assessment: risk,
        recommendations: recommendations(
            risk,
            average_metadata_credibility,
            duplicate_hashes_detected,
            &anomalies.global,
            findings.len(),
            metadata.len(),
        ),
        average_metadata_credibility,
        duplicate_hashes_detected,
        anomalies_summary: serde_json::json!({
            "finding_count": findings.len(),
            "device_inconsistencies": anomalies.global.device_inconsistencies.len(),
            "timestamp_inconsistencies": anomalies.global.timestamp_inconsistencies.len(),
            "isolated_gps": anomalies.global.isolated_gps.len(),
            "brightness_outliers": anomalies.global.brightness_outliers.len(),
            "hash_duplicates": anomalies.global.hash_duplicates.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, ClusterAssignment, IdentityAssessment, Quality};

    fn face(confidence: f64) -> FaceRecord {
        FaceRecord {
            face_id: "f".to_string(),
            image_id: "i".to_string(),
            image_index: 0,
            bbox: BBox::default(),
            embedding: vec![1.0],
            landmarks_68: None,
            landmarks_dense: None,
            head_pose: None,
            quality: Quality::default(),
            confidence,
            detection_model: "test".to_string(),
            error: None,
        }
    }

    #[test]
    fn low_confidence_with_no_findings_is_low_risk() {
        let faces = vec![face(0.1)];
        let summary = synthesize(&faces, None, &OrientationSummary::default(), &OSINTAnomalies::default(), &[]);
        assert_eq!(summary.risk_assessment, RiskAssessment::LowConfidenceOrSynthetic);
    }

    #[test]
    fn recommendations_cover_the_full_rule_table() {
        let faces = vec![face(0.1)];
        let mut anomalies = OSINTAnomalies::default();
        anomalies.global.device_inconsistencies = vec!["iPhone 13 (img0)".to_string()];
        anomalies.global.timestamp_inconsistencies = vec!["img1".to_string()];
        anomalies.global.isolated_gps = vec!["img2".to_string()];
        anomalies.global.brightness_outliers = vec!["img3".to_string()];
        anomalies.global.hash_duplicates = vec!["img4".to_string()];
        let metadata = vec![crate::model::ImageMetadata { credibility_score: 0.2, ..Default::default() }];

        let summary = synthesize(&faces, None, &OrientationSummary::default(), &anomalies, &metadata);

        assert!(summary.recommendations.iter().any(|r| r.contains("credibility")));
        assert!(summary.recommendations.iter().any(|r| r.contains("Duplicate image hashes")));
        assert!(summary.recommendations.iter().any(|r| r.contains("Device inconsistencies")));
        assert!(summary.recommendations.iter().any(|r| r.contains("Timestamp inconsistencies")));
        assert!(summary.recommendations.iter().any(|r| r.contains("GPS")));
        assert!(summary.recommendations.iter().any(|r| r.contains("Brightness outliers")));
        assert!(summary.recommendations.iter().any(|r| r.contains("more images needed")));
    }

    #[test]
    fn all_decode_failed_batch_recommends_more_images() {
        let summary = synthesize(&[], None, &OrientationSummary::default(), &OSINTAnomalies::default(), &[]);
        assert_eq!(summary.risk_assessment, RiskAssessment::LowConfidenceOrSynthetic);
        assert!(summary.recommendations.iter().any(|r| r.contains("more images needed")));
        assert!(summary.recommendations.iter().any(|r| r.contains("No OSINT findings")));
    }

    #[test]
    fn high_confidence_with_findings_is_high_risk() {
        let faces = vec![face(1.0), face(1.0)];
        let similarity = SimilarityAnalysis {
            pairwise_matrix: vec![vec![1.0]],
            reference_embedding: vec![1.0],
            per_face_similarity_to_reference: vec![1.0],
            same_person_confidence: 1.0,
            identity_assessment: IdentityAssessment::SamePersonHigh,
            clusters: ClusterAssignment::default(),
            error: None,
        };
        let mut anomalies = OSINTAnomalies::default();
        anomalies.global.device_inconsistencies = vec!["a".to_string()];
        anomalies.global.timestamp_inconsistencies = vec!["b".to_string()];
        anomalies.global.isolated_gps = vec!["c".to_string()];
        let orientation = OrientationSummary { average_similarity: 1.0, ..Default::default() };
        let summary = synthesize(&faces, Some(&similarity), &orientation, &anomalies, &[]);
        assert_eq!(summary.risk_assessment, RiskAssessment::HighConfidenceIdentification);
        assert_eq!(summary.osint_findings.len(), 3);
    }
}
