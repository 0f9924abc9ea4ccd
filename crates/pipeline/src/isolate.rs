//! Facial Isolation Stage (C6, SPEC_FULL.md §4.6).

use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use sha2::{Digest, Sha256};

use crate::model::{BBox, ComplianceInfo, FaceRecord, IsolatedFrame};
use provenance::{ProvenanceRegistry, RegistryVerdict};

/// Binary bbox-derived mask (white inside, black outside). Extendable to a
/// landmark-hull mask when dense landmarks are available (§4.6).
fn build_mask(width: u32, height: u32, bbox: &BBox) -> RgbaImage {
    let mut mask = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let left = bbox.left.max(0.0) as i32;
    let top = bbox.top.max(0.0) as i32;
    let w = (bbox.width() as u32).min(width.saturating_sub(left.max(0) as u32));
    let h = (bbox.height() as u32).min(height.saturating_sub(top.max(0) as u32));
    if w > 0 && h > 0 {
        draw_filled_rect_mut(&mut mask, Rect::at(left, top).of_size(w, h), Rgba([255, 255, 255, 255]));
    }
    mask
}

fn apply_mask(image: &DynamicImage, mask: &RgbaImage) -> DynamicImage {
    let mut rgba = image.to_rgba8();
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        if mask.get_pixel(x, y).0[0] == 0 {
            *pixel = Rgba([0, 0, 0, 255]);
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn draw_landmarks(width: u32, height: u32, points: Option<&[(f64, f64)]>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
    let Some(points) = points else {
        return canvas;
    };
    for &(x, y) in points {
        let (xi, yi) = (x.round() as i32, y.round() as i32);
        if xi >= 0 && yi >= 0 && (xi as u32) < width && (yi as u32) < height {
            draw_filled_circle_mut(&mut canvas, (xi, yi), 1, Rgba([255, 255, 255, 255]));
        }
    }
    canvas
}

/// Isolate one accepted frame and submit its mask hash to the registry's mask
/// namespace. `None` means the registry dropped it — the caller records it in
/// `dropped_masks` and excludes it from downstream stages.
pub async fn isolate(
    image_id: &str,
    image: &DynamicImage,
    face: &FaceRecord,
    registry: &ProvenanceRegistry,
) -> Option<IsolatedFrame> {
    let (width, height) = image.dimensions();
    let mask = build_mask(width, height, &face.bbox);
    let mask_bytes = mask.as_raw();
    let mask_hash = hex_digest(Sha256::digest(mask_bytes).as_slice());

    let check = registry.check_mask(&mask_hash).await;
    if check.status != RegistryVerdict::Allowed {
        return None;
    }
    registry.register_mask(&mask_hash, vec![image_id.to_string()]).await;

    let masked_image = apply_mask(image, &mask);
    let tracking_points_image = draw_landmarks(width, height, face.landmarks_68.as_deref());

    Some(IsolatedFrame {
        image_id: image_id.to_string(),
        mask_hash,
        facial_region: face.bbox,
        mask_image: Some(masked_image),
        tracking_points_image: Some(DynamicImage::ImageRgba8(tracking_points_image)),
        compliance: ComplianceInfo::accepted(),
    })
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Quality;
    use image::{ImageBuffer, Rgb};

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 40, Rgb([200u8, 150, 100])))
    }

    fn test_face() -> FaceRecord {
        FaceRecord {
            face_id: "0_0".to_string(),
            image_id: "img_000".to_string(),
            image_index: 0,
            bbox: BBox { left: 5.0, top: 5.0, right: 30.0, bottom: 30.0 },
            embedding: vec![1.0],
            landmarks_68: Some(vec![(10.0, 10.0), (20.0, 20.0)]),
            landmarks_dense: None,
            head_pose: None,
            quality: Quality::default(),
            confidence: 0.9,
            detection_model: "test".to_string(),
            error: None,
        }
    }

    #[tokio::test]
    async fn first_isolation_is_allowed_and_registered() {
        let registry = ProvenanceRegistry::in_memory();
        let frame = isolate("img_000", &test_image(), &test_face(), &registry)
            .await
            .expect("allowed");
        assert_eq!(frame.mask_hash.len(), 64);
    }

    #[tokio::test]
    async fn duplicate_mask_is_dropped() {
        let registry = ProvenanceRegistry::in_memory();
        let image = test_image();
        let face = test_face();
        let first = isolate("img_000", &image, &face, &registry).await;
        assert!(first.is_some());

        let second = isolate("img_001", &image, &face, &registry).await;
        assert!(second.is_none());
    }
}
