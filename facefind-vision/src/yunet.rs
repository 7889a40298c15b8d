//! YuNet detector post-processing.
//!
//! YuNet is anchor-free: for each stride (8, 16, 32) it predicts directly
//! from grid cells, emitting `cls [1, N, 1]`, `obj [1, N, 1]`,
//! `bbox [1, N, 4]` and `kps [1, N, 10]` where `N = (input / stride)^2`.
//!
//! Decoding per cell `(i, j)`:
//! cx = (j + dx) * stride / input, cy = (i + dy) * stride / input,
//! w = dw * stride / input, h = dh * stride / input.

use anyhow::Result;
use ndarray::Array2;

const STRIDES: [usize; 3] = [8, 16, 32];

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // normalized [0,1]
}

/// Decode per-stride score/bbox/landmark maps into detections above
/// `score_threshold`.
pub fn decode_detections(
    cls_scores: Vec<Array2<f32>>,
    bbox_preds: Vec<Array2<f32>>,
    landmark_preds: Vec<Array2<f32>>,
    score_threshold: f32,
    input_size: usize,
) -> Result<Vec<RawDetection>> {
    if cls_scores.len() != STRIDES.len()
        || bbox_preds.len() != STRIDES.len()
        || landmark_preds.len() != STRIDES.len()
    {
        anyhow::bail!("expected {} scales of detector output", STRIDES.len());
    }

    let norm = input_size as f32;
    let mut detections = Vec::new();

    for (scale_idx, &stride) in STRIDES.iter().enumerate() {
        let scores = &cls_scores[scale_idx];
        let bboxes = &bbox_preds[scale_idx];
        let landmarks = &landmark_preds[scale_idx];

        let grid = input_size / stride;
        if scores.nrows() != grid * grid {
            anyhow::bail!(
                "Expected {} boxes for stride {} ({}x{} grid), got {}",
                grid * grid,
                stride,
                grid,
                grid,
                scores.nrows()
            );
        }

        let s = stride as f32;
        for i in 0..grid {
            for j in 0..grid {
                let idx = i * grid + j;
                let score = scores[[idx, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (j as f32 + bboxes[[idx, 0]]) * s / norm;
                let cy = (i as f32 + bboxes[[idx, 1]]) * s / norm;
                let w = bboxes[[idx, 2]] * s / norm;
                let h = bboxes[[idx, 3]] * s / norm;

                let mut lms = [0.0f32; 10];
                for k in 0..5 {
                    lms[k * 2] = (j as f32 + landmarks[[idx, k * 2]]) * s / norm;
                    lms[k * 2 + 1] = (i as f32 + landmarks[[idx, k * 2 + 1]]) * s / norm;
                }

                detections.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - h / 2.0, w, h],
                    score,
                    landmarks: lms,
                });
            }
        }
    }

    Ok(detections)
}

/// Split the 12 raw YuNet outputs into (scores, bboxes, landmarks), one map
/// per stride. Scores are `cls * obj`, not yet passed through a sigmoid.
///
/// Output order: cls_8, cls_16, cls_32, obj_8, obj_16, obj_32,
/// bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32.
pub fn parse_yunet_outputs(
    outputs: &[(&[i64], &[f32])],
    input_size: usize,
) -> Result<(Vec<Array2<f32>>, Vec<Array2<f32>>, Vec<Array2<f32>>)> {
    let counts: Vec<usize> = STRIDES
        .iter()
        .map(|s| (input_size / s) * (input_size / s))
        .collect();

    // Group `g` occupies outputs [g*3, g*3+3); each entry is [1, count, width]
    let group = |g: usize, width: usize, name: &str| -> Result<Vec<Array2<f32>>> {
        counts
            .iter()
            .enumerate()
            .map(|(k, &count)| -> Result<Array2<f32>> {
                let idx = g * STRIDES.len() + k;
                let (shape, data) = outputs
                    .get(idx)
                    .ok_or_else(|| anyhow::anyhow!("Missing {} output at index {}", name, idx))?;
                if shape.len() != 3
                    || shape[0] != 1
                    || shape[1] as usize != count
                    || shape[2] as usize != width
                {
                    anyhow::bail!(
                        "Unexpected {} shape at index {}: {:?}, expected [1, {}, {}]",
                        name,
                        idx,
                        shape,
                        count,
                        width
                    );
                }
                Ok(Array2::from_shape_vec((count, width), data.to_vec())?)
            })
            .collect()
    };

    let cls = group(0, 1, "cls")?;
    let obj = group(1, 1, "obj")?;
    let bbox = group(2, 4, "bbox")?;
    let kps = group(3, 10, "kps")?;

    let scores = cls.iter().zip(obj.iter()).map(|(c, o)| c * o).collect();
    Ok((scores, bbox, kps))
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn apply_sigmoid_to_scores(scores: &mut [Array2<f32>]) {
    for score_map in scores {
        score_map.mapv_inplace(sigmoid);
    }
}
