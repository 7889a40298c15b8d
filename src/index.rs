//! The identity index: labelled reference embeddings built once from a
//! training directory and read-only afterwards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::capability::{choose_face, FaceCapability, FaceChoice};
use crate::config::MultiFacePolicy;
use crate::error::{ExtractError, TrainingError};
use crate::Embedding;

/// Training image extensions, matched case-insensitively.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone)]
pub struct IdentityRecord {
    pub label: String,
    /// Image the embedding came from.
    pub source: PathBuf,
    pub embedding: Embedding,
}

/// Insertion-ordered, immutable collection of identity records. Several
/// records may share a label.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    dimension: usize,
    records: Vec<IdentityRecord>,
}

impl IdentityIndex {
    pub fn empty(dimension: usize) -> Self {
        Self {
            dimension,
            records: Vec::new(),
        }
    }

    /// Build an index from ready-made records, checking every embedding
    /// has `dimension` components.
    pub fn from_records(
        dimension: usize,
        records: Vec<IdentityRecord>,
    ) -> Result<Self, TrainingError> {
        if let Some(bad) = records.iter().find(|r| r.embedding.dim() != dimension) {
            return Err(TrainingError::DimensionMismatch {
                path: bad.source.clone(),
                expected: dimension,
                actual: bad.embedding.dim(),
            });
        }
        Ok(Self { dimension, records })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IdentityRecord> {
        self.records.iter()
    }

    /// Distinct labels in first-seen order.
    pub fn labels(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .map(|r| r.label.as_str())
            .filter(|label| seen.insert(*label))
            .collect()
    }
}

impl<'a> IntoIterator for &'a IdentityIndex {
    type Item = &'a IdentityRecord;
    type IntoIter = std::slice::Iter<'a, IdentityRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Identity label for a training image: the file stem, cut at its last
/// `-` so that `alice-1.jpg` and `alice-2.jpg` both train `alice`.
pub fn label_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.rsplit_once('-') {
        Some((name, _)) if !name.is_empty() => name.to_string(),
        _ => stem,
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Regular files directly inside `dir` with an image extension, sorted by
/// file name.
pub fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, TrainingError> {
    if !dir.is_dir() {
        return Err(TrainingError::MissingDirectory(dir.to_path_buf()));
    }
    let io_err = |source| TrainingError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();
        if path.is_file() && has_image_extension(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Build the index from every image in `dir`. Any image without a usable
/// face aborts the whole build; no partial index is returned.
pub fn train(
    dir: &Path,
    capability: &dyn FaceCapability,
    dimension: usize,
    policy: MultiFacePolicy,
) -> Result<IdentityIndex, TrainingError> {
    let files = list_image_files(dir)?;
    if files.is_empty() {
        return Err(TrainingError::NoImages(dir.to_path_buf()));
    }
    info!("Begin training {} images in {}", files.len(), dir.display());

    let mut records = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(&path).map_err(|source| TrainingError::Io {
            path: path.clone(),
            source,
        })?;

        let faces = match capability.extract_embeddings(&bytes) {
            Ok(faces) => faces,
            Err(ExtractError::NoFace) => Vec::new(),
            Err(source) => return Err(TrainingError::Extraction { path, source }),
        };

        let name = path.display().to_string();
        let embedding = match choose_face(faces, policy, &name) {
            FaceChoice::One(embedding) => embedding,
            FaceChoice::NoFace => return Err(TrainingError::NoFaceDetected(path)),
            FaceChoice::Rejected(count) => {
                return Err(TrainingError::MultipleFaces { path, count })
            }
        };

        let label = label_from_path(&path);
        debug!("Trained {} as {:?}", path.display(), label);
        records.push(IdentityRecord {
            label,
            source: path,
            embedding,
        });
    }

    let index = IdentityIndex::from_records(dimension, records)?;
    info!(
        "Trained {} record(s) for {} identities",
        index.len(),
        index.labels().len()
    );
    Ok(index)
}
