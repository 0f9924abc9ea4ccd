//! Cross-Frame Similarity Analyzer (C4, SPEC_FULL.md §4.4).
//!
//! The L2-normalize/dot-product helpers follow the same small-vector-algebra
//! posture as `other_examples/.../face_group.rs`'s Chinese-Whispers clustering;
//! here the grouping itself is DBSCAN-style density clustering instead, per
//! the spec.

use crate::model::{ClusterAssignment, FaceRecord, IdentityAssessment, SimilarityAnalysis};

fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let an = l2_normalize(a);
    let bn = l2_normalize(b);
    an.iter().zip(bn.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return f64::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((*x - *y) as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Blend of cosine similarity and `1 - distance`, computed independently and
/// averaged (§4.4 open-question resolution).
fn blended_similarity(a: &[f32], b: &[f32]) -> f64 {
    let cosine = cosine_similarity(a, b);
    // unit vectors: euclidean distance ranges [0, 2]; normalize to [0, 1]
    let distance_similarity = 1.0 - (euclidean_distance(a, b) / 2.0).min(1.0);
    (cosine + distance_similarity) / 2.0
}

/// Analyze the flattened face list across the whole batch.
pub fn analyze(faces: &[&FaceRecord], epsilon: f64, min_samples: usize) -> SimilarityAnalysis {
    let embeddings: Vec<&Vec<f32>> = faces.iter().map(|f| &f.embedding).filter(|e| !e.is_empty()).collect();

    if embeddings.len() < 2 {
        return SimilarityAnalysis::insufficient_data();
    }

    let n = embeddings.len();
    let mut matrix = vec![vec![1.0f64; n]; n];
    let mut upper_sum = 0.0;
    let mut upper_count = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = blended_similarity(embeddings[i], embeddings[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
            upper_sum += sim;
            upper_count += 1;
        }
    }
    let same_person_confidence = if upper_count > 0 { upper_sum / upper_count as f64 } else { 0.0 };

    let dim = embeddings[0].len();
    let mut reference = vec![0f32; dim];
    for e in &embeddings {
        for (acc, v) in reference.iter_mut().zip(e.iter()) {
            *acc += v;
        }
    }
    for v in &mut reference {
        *v /= n as f32;
    }
    let reference_normalized = l2_normalize(&reference);
    let per_face_similarity_to_reference: Vec<f64> = embeddings
        .iter()
        .map(|e| cosine_similarity(e, &reference_normalized))
        .collect();

    let clusters = dbscan_cosine(&embeddings, epsilon, min_samples);

    let identity_assessment = if same_person_confidence > 0.5 {
        IdentityAssessment::SamePersonHigh
    } else if same_person_confidence > 0.25 {
        IdentityAssessment::SamePersonModerate
    } else {
        IdentityAssessment::DifferentPeople
    };

    SimilarityAnalysis {
        pairwise_matrix: matrix,
        reference_embedding: reference,
        per_face_similarity_to_reference,
        same_person_confidence,
        identity_assessment,
        clusters,
        error: None,
    }
}

/// DBSCAN with a cosine-distance metric (`1 - cosine_similarity`).
fn dbscan_cosine(embeddings: &[&Vec<f32>], epsilon: f64, min_samples: usize) -> ClusterAssignment {
    let n = embeddings.len();
    let mut labels = vec![-2i32; n]; // -2 = unvisited, -1 = noise, >=0 = cluster id
    let neighbors = |i: usize| -> Vec<usize> {
        (0..n)
            .filter(|&j| j != i && (1.0 - cosine_similarity(embeddings[i], embeddings[j])) <= epsilon)
            .collect()
    };

    let mut next_cluster = 0i32;
    for i in 0..n {
        if labels[i] != -2 {
            continue;
        }
        let neighbors_i = neighbors(i);
        if neighbors_i.len() + 1 < min_samples {
            labels[i] = -1;
            continue;
        }

        labels[i] = next_cluster;
        let mut seeds = neighbors_i;
        let mut idx = 0;
        while idx < seeds.len() {
            let q = seeds[idx];
            if labels[q] == -1 {
                labels[q] = next_cluster;
            }
            if labels[q] == -2 {
                labels[q] = next_cluster;
                let neighbors_q = neighbors(q);
                if neighbors_q.len() + 1 >= min_samples {
                    for nb in neighbors_q {
                        if !seeds.contains(&nb) {
                            seeds.push(nb);
                        }
                    }
                }
            }
            idx += 1;
        }
        next_cluster += 1;
    }

    let noise_count = labels.iter().filter(|&&l| l == -1).count();
    let cluster_count = labels.iter().filter(|&&l| l >= 0).map(|&l| l).collect::<std::collections::HashSet<_>>().len();

    ClusterAssignment { labels, cluster_count, noise_count }
}

/// The largest cluster by member count; ties break toward the lowest label
/// (§4.5 open-question resolution). `None` when there are no clustered
/// (non-noise) faces at all, in which case callers should treat every face as
/// one implicit cluster (the orientation gate's stated fallback).
pub fn dominant_cluster(clusters: &ClusterAssignment) -> Option<i32> {
    let mut counts: std::collections::BTreeMap<i32, usize> = std::collections::BTreeMap::new();
    for &label in &clusters.labels {
        if label >= 0 {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(label, _)| label)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, Quality};

    fn face(id: &str, embedding: Vec<f32>) -> FaceRecord {
        FaceRecord {
            face_id: id.to_string(),
            image_id: id.to_string(),
            image_index: 0,
            bbox: BBox::default(),
            embedding,
            landmarks_68: None,
            landmarks_dense: None,
            head_pose: None,
            quality: Quality::default(),
            confidence: 1.0,
            detection_model: "test".to_string(),
            error: None,
        }
    }

    #[test]
    fn fewer_than_two_embeddings_is_insufficient_data() {
        let f = face("a", vec![1.0, 0.0]);
        let faces = vec![&f];
        let result = analyze(&faces, 0.5, 2);
        assert_eq!(result.identity_assessment, IdentityAssessment::InsufficientData);
    }

    #[test]
    fn identical_embeddings_yield_high_confidence() {
        let a = face("a", vec![1.0, 0.0, 0.0]);
        let b = face("b", vec![1.0, 0.0, 0.0]);
        let faces = vec![&a, &b];
        let result = analyze(&faces, 0.5, 2);
        assert_eq!(result.identity_assessment, IdentityAssessment::SamePersonHigh);
        assert!((result.pairwise_matrix[0][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_embeddings_yield_different_people() {
        let a = face("a", vec![1.0, 0.0]);
        let b = face("b", vec![0.0, 1.0]);
        let faces = vec![&a, &b];
        let result = analyze(&faces, 0.5, 2);
        assert_eq!(result.identity_assessment, IdentityAssessment::DifferentPeople);
    }

    #[test]
    fn dominant_cluster_breaks_ties_toward_lowest_label() {
        let clusters = ClusterAssignment { labels: vec![0, 0, 1, 1], cluster_count: 2, noise_count: 0 };
        assert_eq!(dominant_cluster(&clusters), Some(0));
    }

    #[test]
    fn pairwise_matrix_is_symmetric_with_unit_diagonal() {
        let a = face("a", vec![1.0, 0.2, 0.3]);
        let b = face("b", vec![0.1, 1.0, 0.1]);
        let c = face("c", vec![0.2, 0.1, 1.0]);
        let faces = vec![&a, &b, &c];
        let result = analyze(&faces, 0.5, 2);
        for i in 0..3 {
            assert!((result.pairwise_matrix[i][i] - 1.0).abs() < 1e-9);
            for j in 0..3 {
                assert!((result.pairwise_matrix[i][j] - result.pairwise_matrix[j][i]).abs() < 1e-9);
            }
        }
    }
}
