#![allow(dead_code)]

use std::path::Path;

use facefind::{Embedding, ExtractError, FaceCapability};

pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Capability that reads embeddings straight out of the image bytes: a PNG
/// signature followed by `x,y,z` lists, one per face, separated by `;`.
/// `ERR` after the signature simulates a model failure.
pub struct FixtureCapability;

impl FaceCapability for FixtureCapability {
    fn extract_embeddings(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
        let text = std::str::from_utf8(image.get(PNG_MAGIC.len()..).unwrap_or_default())
            .map_err(|e| ExtractError::Model(e.into()))?;
        if text == "ERR" {
            return Err(ExtractError::Model(anyhow::anyhow!("fixture model failure")));
        }
        let faces = text
            .split(';')
            .filter(|s| !s.trim().is_empty())
            .map(|face| {
                face.split(',')
                    .map(|v| v.trim().parse::<f32>())
                    .collect::<Result<Vec<_>, _>>()
                    .map(Embedding::from_vec)
                    .map_err(|e| ExtractError::Model(e.into()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if faces.is_empty() {
            return Err(ExtractError::NoFace);
        }
        Ok(faces)
    }
}

pub fn encode(faces: &[&[f32]]) -> Vec<u8> {
    let text = faces
        .iter()
        .map(|f| {
            f.iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join(";");
    [PNG_MAGIC, text.as_bytes()].concat()
}

pub fn write_image(dir: &Path, name: &str, faces: &[&[f32]]) {
    std::fs::write(dir.join(name), encode(faces)).unwrap();
}

pub const A1: [f32; 3] = [0.0, 0.0, 0.0];
pub const A2: [f32; 3] = [0.05, 0.0, 0.0];

/// 2.0 away from both A1 and A2.
pub fn b1() -> [f32; 3] {
    [0.025, (4.0f32 - 0.025 * 0.025).sqrt(), 0.0]
}

/// 1.5 away from A1, A2 and B1.
pub fn equidistant() -> [f32; 3] {
    let b = b1()[1];
    let y = (b * b - 0.025 * 0.025) / (2.0 * b);
    let z = (2.25 - 0.025 * 0.025 - y * y).sqrt();
    [0.025, y, z]
}

/// `alice-1.jpg`, `alice-2.jpg`, `bob-1.jpg` with A1, A2 and B1.
pub fn scenario_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_image(dir.path(), "alice-1.jpg", &[&A1]);
    write_image(dir.path(), "alice-2.jpg", &[&A2]);
    write_image(dir.path(), "bob-1.jpg", &[&b1()]);
    dir
}
