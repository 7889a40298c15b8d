use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use std::path::Path;

use crate::face::{self, Detection, Embedding, ENCODER_INPUT};

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub options: PipelineOptions,
}

impl Pipeline {
    pub fn load(detector: &Path, recognizer: &Path, options: PipelineOptions) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector)?,
            encoder: crate::model::recog_session(recognizer)?,
            options,
        })
    }

    pub fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")
    }

    /// Embed every detected face, most confident first. An image without a
    /// face yields an empty vector.
    pub fn extract_embeddings(&mut self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        let detections = self.detect(img)?;
        let mut embeddings = Vec::with_capacity(detections.len());
        for detection in &detections {
            let aligned =
                face::align_face(img, detection, ENCODER_INPUT).context("aligning face")?;
            embeddings.push(face::encode_face(&mut self.encoder, &aligned).context("encoding face")?);
        }
        Ok(embeddings)
    }
}
