//! 4D Model Refiner (C8, SPEC_FULL.md §4.8).
//!
//! Builds the surface mesh, detection pointers, and content hashes from a
//! merged landmark cloud, then submits the model hash to the registry's
//! model namespace.

use delaunator::{triangulate, Point};
use md5::{Digest as Md5Digest, Md5};
use serde_json::json;
use sha2::{Digest as Sha256Digest, Sha256};

use crate::model::{
    ConfidenceDistribution, DetectionPointer, Final4DModel, MergedLandmarkCloud, SurfaceMesh,
};
use provenance::{ProvenanceRegistry, RegistryVerdict};

/// Triangulate the (x,y) projection with `delaunator`; when there are fewer
/// than 4 points (too small for a meaningful triangulation) or delaunator
/// finds no triangles, fall back to a centroid-nearest-apex angular fan
/// (§4.8 open-question resolution). The fallback fan, not the Delaunay mesh,
/// is the one eligible for Laplacian smoothing (§4.12): the Delaunay path
/// already reflects well-conditioned input geometry.
fn build_mesh(points: &[[f64; 3]], smoothing_iterations: u32) -> SurfaceMesh {
    if points.len() < 4 {
        let mut mesh = fan_mesh(points);
        laplacian_smooth(&mut mesh, smoothing_iterations);
        return mesh;
    }

    let delaunay_points: Vec<Point> = points.iter().map(|p| Point { x: p[0], y: p[1] }).collect();
    let result = triangulate(&delaunay_points);
    if result.triangles.is_empty() {
        let mut mesh = fan_mesh(points);
        laplacian_smooth(&mut mesh, smoothing_iterations);
        return mesh;
    }

    let faces = result
        .triangles
        .chunks(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();

    SurfaceMesh { vertices: points.to_vec(), faces }
}

/// Averages each vertex toward its face-adjacency neighbors, `iterations`
/// times. Vertex 0 is the fan's synthetic centroid anchor and is never moved;
/// with `iterations == 0` this is a no-op, matching `disable_smoothing`.
fn laplacian_smooth(mesh: &mut SurfaceMesh, iterations: u32) {
    let n = mesh.vertices.len();
    if iterations == 0 || mesh.faces.is_empty() || n < 2 {
        return;
    }

    for _ in 0..iterations {
        let mut sum = vec![[0.0_f64; 3]; n];
        let mut count = vec![0usize; n];
        for face in &mesh.faces {
            for &v in face {
                for &w in face {
                    if v != w && v != 0 {
                        sum[v][0] += mesh.vertices[w][0];
                        sum[v][1] += mesh.vertices[w][1];
                        sum[v][2] += mesh.vertices[w][2];
                        count[v] += 1;
                    }
                }
            }
        }
        for v in 1..n {
            if count[v] > 0 {
                mesh.vertices[v] = [
                    sum[v][0] / count[v] as f64,
                    sum[v][1] / count[v] as f64,
                    sum[v][2] / count[v] as f64,
                ];
            }
        }
    }
}

/// Angular fan anchored at the centroid, sorted by bearing so adjacent
/// wedges don't cross.
fn fan_mesh(points: &[[f64; 3]]) -> SurfaceMesh {
    if points.len() < 3 {
        return SurfaceMesh { vertices: points.to_vec(), faces: Vec::new() };
    }

    let n = points.len();
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n as f64;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n as f64;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        let angle_a = (points[a][1] - cy).atan2(points[a][0] - cx);
        let angle_b = (points[b][1] - cy).atan2(points[b][0] - cx);
        angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut vertices = vec![[cx, cy, points.iter().map(|p| p[2]).sum::<f64>() / n as f64]];
    vertices.extend(points.iter().copied());

    let mut faces = Vec::with_capacity(n);
    for i in 0..n {
        let a = i + 1;
        let b = (i + 1) % n + 1;
        faces.push([0, a, b]);
    }

    SurfaceMesh { vertices, faces }
}

fn detection_pointers(points: &[[f64; 3]], confidences: &[f64]) -> Vec<DetectionPointer> {
    let n = points.len();
    if n == 0 {
        return Vec::new();
    }
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n as f64;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n as f64;
    let cz = points.iter().map(|p| p[2]).sum::<f64>() / n as f64;
    let center = [cx, cy, cz];

    points
        .iter()
        .zip(confidences.iter())
        .map(|(&landmark, &confidence)| DetectionPointer { center, landmark, confidence })
        .collect()
}

fn confidence_distribution(confidences: &[f64]) -> ConfidenceDistribution {
    let mut dist = ConfidenceDistribution::default();
    for &c in confidences {
        if c > 0.8 {
            dist.high += 1;
        } else if c >= 0.5 {
            dist.medium += 1;
        } else {
            dist.low += 1;
        }
    }
    dist
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn facial_geometry_hash(points: &[[f64; 3]]) -> String {
    let encoded = json!(points).to_string();
    hex_digest(Md5::digest(encoded.as_bytes()).as_slice())
}

fn biometric_template(points: &[[f64; 3]]) -> String {
    let n = points.len().max(1) as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let cz = points.iter().map(|p| p[2]).sum::<f64>() / n;

    let centered: Vec<[f64; 3]> = points
        .iter()
        .map(|p| {
            [
                ((p[0] - cx) * 100.0).round() / 100.0,
                ((p[1] - cy) * 100.0).round() / 100.0,
                ((p[2] - cz) * 100.0).round() / 100.0,
            ]
        })
        .collect();

    let encoded = json!(centered).to_string();
    hex_digest(Sha256::digest(encoded.as_bytes()).as_slice())
}

/// Build the 4D model and submit its hash to the registry. `None` means the
/// registry dropped the model (duplicate geometry) — the caller records it as
/// a compliance drop rather than publishing the model. `smoothing_iterations`
/// is the Laplacian smoothing pass count for the fallback fan triangulation;
/// pass `0` when `disable_smoothing` is set.
pub async fn refine(
    cloud: &MergedLandmarkCloud,
    registry: &ProvenanceRegistry,
    smoothing_iterations: u32,
) -> Final4DModel {
    let mesh = build_mesh(&cloud.points, smoothing_iterations);
    let pointers = detection_pointers(&cloud.points, &cloud.per_point_confidence);
    let distribution = confidence_distribution(&cloud.per_point_confidence);
    let confidence_score = if cloud.per_point_confidence.is_empty() {
        0.0
    } else {
        cloud.per_point_confidence.iter().sum::<f64>() / cloud.per_point_confidence.len() as f64
    };

    let geometry_hash = facial_geometry_hash(&cloud.points);
    let template = biometric_template(&cloud.points);

    let mut model = Final4DModel {
        facial_points: cloud.points.clone(),
        surface_mesh: mesh,
        detection_pointers: pointers,
        confidence_score,
        facial_geometry_hash: geometry_hash,
        biometric_template: template,
        model_hash: String::new(),
        confidence_distribution: distribution,
        compliance_status: None,
        drop_reason: None,
    };

    let canonical = json!({
        "facial_points": model.facial_points,
        "facial_geometry_hash": model.facial_geometry_hash,
        "biometric_template": model.biometric_template,
    })
    .to_string();
    model.model_hash = hex_digest(Sha256::digest(canonical.as_bytes()).as_slice());

    let check = registry.check_model(&model.model_hash).await;
    if check.status != RegistryVerdict::Allowed {
        model.compliance_status = Some("dropped".to_string());
        model.drop_reason = Some(format!("{:?}", check.status));
        return model;
    }

    registry
        .register_model(
            &model.model_hash,
            json!({ "point_count": model.facial_points.len() }),
        )
        .await;
    model.compliance_status = Some("accepted".to_string());
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cloud() -> MergedLandmarkCloud {
        MergedLandmarkCloud {
            points: vec![
                [0.0, 0.0, 0.0],
                [10.0, 0.0, 1.0],
                [5.0, 10.0, 2.0],
                [5.0, 5.0, 1.5],
            ],
            per_point_confidence: vec![0.9, 0.6, 0.3, 1.0],
            per_point_depth: vec![0.0, 1.0, 2.0, 1.5],
            per_point_color: vec![[128, 128, 128]; 4],
            source_frame_count: 2,
            original_point_count: 8,
            compression_ratio: 0.5,
        }
    }

    #[tokio::test]
    async fn refine_builds_mesh_and_accepts_first_model() {
        let registry = ProvenanceRegistry::in_memory();
        let cloud = sample_cloud();
        let model = refine(&cloud, &registry, 0).await;
        assert_eq!(model.compliance_status.as_deref(), Some("accepted"));
        assert!(!model.surface_mesh.faces.is_empty());
        assert_eq!(model.model_hash.len(), 64);
        assert_eq!(model.facial_geometry_hash.len(), 32);
    }

    #[tokio::test]
    async fn duplicate_geometry_is_dropped_on_second_submission() {
        let registry = ProvenanceRegistry::in_memory();
        let cloud = sample_cloud();
        let first = refine(&cloud, &registry, 0).await;
        assert_eq!(first.compliance_status.as_deref(), Some("accepted"));

        let second = refine(&cloud, &registry, 0).await;
        assert_eq!(second.compliance_status.as_deref(), Some("dropped"));
        assert!(second.drop_reason.is_some());
    }

    #[test]
    fn confidence_distribution_buckets_correctly() {
        let dist = confidence_distribution(&[0.9, 0.6, 0.4, 0.85]);
        assert_eq!(dist.high, 2);
        assert_eq!(dist.medium, 1);
        assert_eq!(dist.low, 1);
    }

    #[test]
    fn fewer_than_four_points_uses_fan_mesh() {
        let points = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.5, 1.0, 0.0]];
        let mesh = build_mesh(&points, 0);
        assert_eq!(mesh.vertices.len(), 4); // centroid + 3
        assert_eq!(mesh.faces.len(), 3);
    }

    #[test]
    fn zero_smoothing_iterations_leaves_fan_mesh_untouched() {
        let points = vec![[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [1.0, 2.0, 0.0]];
        let raw = fan_mesh(&points);
        let unsmoothed = build_mesh(&points, 0);
        assert_eq!(unsmoothed.vertices, raw.vertices);
    }

    #[test]
    fn smoothing_moves_fan_vertices_toward_their_neighbors() {
        let points = vec![[0.0, 0.0, 0.0], [9.0, 1.0, 0.0], [2.0, 11.0, 0.0]];
        let unsmoothed = build_mesh(&points, 0);
        let smoothed = build_mesh(&points, 3);
        assert_eq!(smoothed.vertices[0], unsmoothed.vertices[0]); // centroid anchor never moves
        assert_ne!(smoothed.vertices[1..], unsmoothed.vertices[1..]);
    }
}
