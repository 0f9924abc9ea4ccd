//! Landmark Merger (C7, SPEC_FULL.md §4.7).
//!
//! Single-pass spatial agglomeration, the same clustering posture as C4's
//! embedding clustering (`similarity.rs`, itself grounded in
//! `other_examples/.../face_group.rs`) applied over (x,y) instead of over
//! embedding space.

use image::{DynamicImage, GenericImageView};

use crate::model::MergedLandmarkCloud;

/// One dense landmark contributed by one accepted, isolated frame, carrying
/// enough context to sample a color from its source frame.
pub struct SourcePoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub frame_image: Option<usize>,
}

pub fn merge(points: &[SourcePoint], images: &[DynamicImage], threshold_px: f64) -> MergedLandmarkCloud {
    let n = points.len();
    let mut processed = vec![false; n];
    let mut merged_points = Vec::new();
    let mut confidences = Vec::new();
    let mut depths = Vec::new();
    let mut colors = Vec::new();

    for i in 0..n {
        if processed[i] {
            continue;
        }
        let mut members = vec![i];
        processed[i] = true;
        for j in (i + 1)..n {
            if processed[j] {
                continue;
            }
            let dx = points[i].x - points[j].x;
            let dy = points[i].y - points[j].y;
            if (dx * dx + dy * dy).sqrt() <= threshold_px {
                members.push(j);
                processed[j] = true;
            }
        }

        let cluster_size = members.len();
        let cx = members.iter().map(|&m| points[m].x).sum::<f64>() / cluster_size as f64;
        let cy = members.iter().map(|&m| points[m].y).sum::<f64>() / cluster_size as f64;
        let cz = members.iter().map(|&m| points[m].z).sum::<f64>() / cluster_size as f64;

        let confidence = if cluster_size <= 1 { 0.5 } else { (cluster_size as f64 / 5.0).min(1.0) };

        let color = sample_color(&points[members[0]], images, cx, cy);

        merged_points.push([cx, cy, cz]);
        confidences.push(confidence);
        depths.push(cz);
        colors.push(color);
    }

    let original_point_count = n;
    let merged_count = merged_points.len();
    MergedLandmarkCloud {
        points: merged_points,
        per_point_confidence: confidences,
        per_point_depth: depths,
        per_point_color: colors,
        source_frame_count: images.len(),
        original_point_count,
        compression_ratio: if original_point_count > 0 {
            merged_count as f64 / original_point_count as f64
        } else {
            0.0
        },
    }
}

fn sample_color(source: &SourcePoint, images: &[DynamicImage], x: f64, y: f64) -> [u8; 3] {
    const NEUTRAL_GRAY: [u8; 3] = [128, 128, 128];
    let Some(index) = source.frame_image else {
        return NEUTRAL_GRAY;
    };
    let Some(image) = images.get(index) else {
        return NEUTRAL_GRAY;
    };
    let (w, h) = image.dimensions();
    if x < 0.0 || y < 0.0 || x as u32 >= w || y as u32 >= h {
        return NEUTRAL_GRAY;
    }
    let pixel = image.get_pixel(x as u32, y as u32);
    [pixel.0[0], pixel.0[1], pixel.0[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_points_merge_into_one_cluster() {
        let points = vec![
            SourcePoint { x: 10.0, y: 10.0, z: 0.0, frame_image: None },
            SourcePoint { x: 12.0, y: 11.0, z: 1.0, frame_image: None },
            SourcePoint { x: 13.0, y: 9.0, z: 2.0, frame_image: None },
        ];
        let result = merge(&points, &[], 10.0);
        assert_eq!(result.points.len(), 1);
        // cluster_size = 3, confidence = min(1, 3/5) = 0.6.
        assert_eq!(result.per_point_confidence[0], 0.6);
        assert_eq!(result.original_point_count, 3);
        assert!((result.compression_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn far_apart_points_stay_separate() {
        let points = vec![
            SourcePoint { x: 0.0, y: 0.0, z: 0.0, frame_image: None },
            SourcePoint { x: 500.0, y: 500.0, z: 0.0, frame_image: None },
        ];
        let result = merge(&points, &[], 10.0);
        assert_eq!(result.points.len(), 2);
        assert!(result.per_point_confidence.iter().all(|&c| c == 0.5));
    }

    #[test]
    fn large_cluster_confidence_saturates_at_one() {
        let points: Vec<SourcePoint> = (0..10)
            .map(|i| SourcePoint { x: i as f64 * 0.1, y: 0.0, z: 0.0, frame_image: None })
            .collect();
        let result = merge(&points, &[], 10.0);
        assert_eq!(result.points.len(), 1);
        assert_eq!(result.per_point_confidence[0], 1.0);
    }
}
