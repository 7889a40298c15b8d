use crate::yunet;
use anyhow::{Context, Result};
use image::{DynamicImage, GenericImageView, RgbImage};
use ndarray::{Array1, Array4};
use ort::{session::Session, value::Value};

/// YuNet input resolution (square).
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input resolution (square).
pub const ENCODER_INPUT: u32 = 112;

/// Detection result from YuNet
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// Fixed-length face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array1<f32>,
}

impl Embedding {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            vector: Array1::from_vec(values),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.to_vec()
    }

    /// L2 distance. Extra components of the longer vector are ignored, so
    /// callers compare only embeddings of equal dimension.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Planar BGR tensor `[1, 3, H, W]` with values in `[0, 255]`, the layout
/// both YuNet and SFace expect.
fn bgr_tensor(img: &RgbImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        img.get_pixel(x as u32, y as u32)[2 - c] as f32
    })
}

/// Detect faces in an image using YuNet detector.
///
/// Detections come back sorted by descending score.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT;
    let (orig_w, orig_h) = img.dimensions();
    if orig_w == 0 || orig_h == 0 {
        anyhow::bail!("image has zero area");
    }

    // Letterbox into a square canvas so the aspect ratio survives
    let scale = target as f32 / orig_w.max(orig_h) as f32;
    let new_w = ((orig_w as f32 * scale) as u32).max(1);
    let new_h = ((orig_h as f32 * scale) as u32).max(1);
    let resized = img.resize_exact(new_w, new_h, image::imageops::FilterType::Triangle);

    let mut canvas = DynamicImage::new_rgb8(target, target);
    let offset_x = (target - new_w) / 2;
    let offset_y = (target - new_h) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let input_tensor = Value::from_array(bgr_tensor(&canvas.to_rgb8()))?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut output_data: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        output_data.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let output_refs: Vec<(&[i64], &[f32])> = output_data
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let (mut cls_scores, bbox_preds, landmark_preds) =
        yunet::parse_yunet_outputs(&output_refs, target as usize)
            .context("parsing detector outputs")?;
    yunet::apply_sigmoid_to_scores(&mut cls_scores);

    let raw = yunet::decode_detections(
        cls_scores,
        bbox_preds,
        landmark_preds,
        score_threshold,
        target as usize,
    )?;

    // Normalized canvas coordinates -> original image pixels
    let to_orig_x = |v: f32| (v * target as f32 - offset_x as f32) / scale;
    let to_orig_y = |v: f32| (v * target as f32 - offset_y as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for i in 0..5 {
                landmarks[i * 2] = to_orig_x(d.landmarks[i * 2]);
                landmarks[i * 2 + 1] = to_orig_y(d.landmarks[i * 2 + 1]);
            }
            Detection {
                bbox: [
                    to_orig_x(d.bbox[0]),
                    to_orig_y(d.bbox[1]),
                    d.bbox[2] * target as f32 / scale,
                    d.bbox[3] * target as f32 / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    Ok(nms(&detections, nms_threshold))
}

/// Non-maximum suppression. The result is ordered by descending score.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::with_capacity(sorted.len());
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Align and crop a face using its eye landmarks (similarity transform onto
/// the ArcFace 112x112 reference eye positions).
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
    const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);
    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt();
    if eye_dist <= f32::EPSILON {
        anyhow::bail!("degenerate landmarks: eyes coincide");
    }

    let ref_dist = ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2)
        + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
    .sqrt();
    let unit = size as f32 / ENCODER_INPUT as f32;
    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);

    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0 * unit,
        (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0 * unit,
    );

    // output = [a b; c d] * input + [tx ty]
    let (a, b) = (scale * angle.cos(), scale * angle.sin());
    let (c, d) = (-b, a);
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);
    let det = a * d - b * c;

    let src = img.to_rgb8();
    let (img_w, img_h) = src.dimensions();
    let mut output = RgbImage::new(size, size);

    for out_y in 0..size {
        for out_x in 0..size {
            let px = out_x as f32 - tx;
            let py = out_y as f32 - ty;
            let in_x = (d * px - b * py) / det;
            let in_y = (-c * px + a * py) / det;

            if in_x < 0.0 || in_y < 0.0 || in_x >= img_w as f32 || in_y >= img_h as f32 {
                continue;
            }

            // Bilinear sample
            let x0 = in_x.floor() as u32;
            let y0 = in_y.floor() as u32;
            let x1 = (x0 + 1).min(img_w - 1);
            let y1 = (y0 + 1).min(img_h - 1);
            let fx = in_x - x0 as f32;
            let fy = in_y - y0 as f32;

            let p00 = src.get_pixel(x0, y0);
            let p10 = src.get_pixel(x1, y0);
            let p01 = src.get_pixel(x0, y1);
            let p11 = src.get_pixel(x1, y1);

            let mut rgb = [0u8; 3];
            for (ch, out) in rgb.iter_mut().enumerate() {
                let v = p00[ch] as f32 * (1.0 - fx) * (1.0 - fy)
                    + p10[ch] as f32 * fx * (1.0 - fy)
                    + p01[ch] as f32 * (1.0 - fx) * fy
                    + p11[ch] as f32 * fx * fy;
                *out = v as u8;
            }
            output.put_pixel(out_x, out_y, image::Rgb(rgb));
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Encode an aligned face into an L2-normalized SFace embedding.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(
            ENCODER_INPUT,
            ENCODER_INPUT,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();

    let input_tensor = Value::from_array(bgr_tensor(&face))?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    // Expecting shape [1, D]
    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values = data[..dim].to_vec();

    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }

    Ok(Embedding::from_vec(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f32; 4], score: f32) -> Detection {
        Detection {
            bbox,
            score,
            landmarks: [0.0; 10],
        }
    }

    #[test]
    fn test_iou() {
        let a = [10.0, 10.0, 20.0, 20.0];
        let b = [15.0, 15.0, 20.0, 20.0];
        let iou = compute_iou(&a, &b);
        assert!(iou > 0.0 && iou < 1.0);

        // No overlap
        let c = [100.0, 100.0, 10.0, 10.0];
        assert_eq!(compute_iou(&a, &c), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_first() {
        let detections = vec![
            det([12.0, 12.0, 20.0, 20.0], 0.8),
            det([100.0, 100.0, 20.0, 20.0], 0.85),
            det([10.0, 10.0, 20.0, 20.0], 0.9),
        ];

        let result = nms(&detections, 0.3);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].score, 0.9);
        assert_eq!(result[1].score, 0.85);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::from_vec(vec![0.0, 0.0, 0.0]);
        let b = Embedding::from_vec(vec![3.0, 4.0, 0.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(b.euclidean_distance(&b), 0.0);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
    }

    #[test]
    fn test_bgr_tensor_channel_order() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(1, 0, image::Rgb([10, 20, 30]));
        let t = bgr_tensor(&img);
        assert_eq!(t.shape(), &[1, 3, 1, 2]);
        assert_eq!(t[[0, 0, 0, 1]], 30.0);
        assert_eq!(t[[0, 1, 0, 1]], 20.0);
        assert_eq!(t[[0, 2, 0, 1]], 10.0);
    }

    #[test]
    fn test_align_rejects_degenerate_landmarks() {
        let img = DynamicImage::new_rgb8(64, 64);
        let d = det([0.0, 0.0, 64.0, 64.0], 0.9);
        assert!(align_face(&img, &d, ENCODER_INPUT).is_err());
    }

    #[test]
    fn test_align_output_size() {
        let img = DynamicImage::new_rgb8(200, 200);
        let mut d = det([50.0, 50.0, 100.0, 100.0], 0.9);
        d.landmarks[..4].copy_from_slice(&[80.0, 90.0, 120.0, 90.0]);
        let aligned = align_face(&img, &d, ENCODER_INPUT).unwrap();
        assert_eq!(aligned.dimensions(), (ENCODER_INPUT, ENCODER_INPUT));
    }
}
