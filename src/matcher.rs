use std::collections::HashSet;
use std::sync::Arc;

use image::ImageFormat;

use crate::capability::{choose_face, FaceCapability, FaceChoice};
use crate::config::{Config, MultiFacePolicy};
use crate::error::FindError;
use crate::index::IdentityIndex;
use crate::Embedding;

#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// A record matches when its distance is strictly below this.
    pub threshold: f32,
    pub multi_face: MultiFacePolicy,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            multi_face: MultiFacePolicy::First,
        }
    }
}

impl From<&Config> for MatchOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            threshold: cfg.threshold,
            multi_face: cfg.multi_face,
        }
    }
}

/// One index record within the threshold of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub label: &'a str,
    pub distance: f32,
}

/// Owns the trained index and answers lookups against it. Lookups take
/// `&self` only, so one instance can be shared across threads.
pub struct MatchService {
    index: IdentityIndex,
    capability: Arc<dyn FaceCapability>,
    options: MatchOptions,
}

impl MatchService {
    pub fn new(
        index: IdentityIndex,
        capability: Arc<dyn FaceCapability>,
        options: MatchOptions,
    ) -> Self {
        Self {
            index,
            capability,
            options,
        }
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub fn options(&self) -> MatchOptions {
        self.options
    }

    /// Labels of every identity close enough to the face in `image`,
    /// deduplicated, in index order. An unknown face gives an empty list.
    pub fn find(&self, image: &[u8]) -> Result<Vec<String>, FindError> {
        let query = self.query_embedding(image)?;
        let names = self.find_embedding(&query)?;
        log::debug!("Query matched {} identities", names.len());
        Ok(names)
    }

    /// Scan the index for `query`. Pure: same index and query, same answer.
    pub fn find_embedding(&self, query: &Embedding) -> Result<Vec<String>, FindError> {
        let mut seen = HashSet::new();
        Ok(self
            .matches(query)?
            .into_iter()
            .filter(|m| seen.insert(m.label))
            .map(|m| m.label.to_string())
            .collect())
    }

    /// Every matching record with its distance, in index order. A query of
    /// the wrong dimension is an error, never a truncated comparison.
    pub fn matches(&self, query: &Embedding) -> Result<Vec<Match<'_>>, FindError> {
        if query.dim() != self.index.dimension() {
            return Err(FindError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: query.dim(),
            });
        }
        Ok(self
            .index
            .iter()
            .filter_map(|record| {
                let distance = self.capability.distance(query, &record.embedding);
                (distance < self.options.threshold).then_some(Match {
                    label: &record.label,
                    distance,
                })
            })
            .collect())
    }

    fn query_embedding(&self, image: &[u8]) -> Result<Embedding, FindError> {
        if image.is_empty() {
            return Err(FindError::EmptyImage);
        }
        match image::guess_format(image) {
            Ok(ImageFormat::Jpeg | ImageFormat::Png) => {}
            _ => return Err(FindError::UnsupportedImage),
        }

        let faces = self.capability.extract_embeddings(image)?;
        match choose_face(faces, self.options.multi_face, "query image") {
            FaceChoice::One(embedding) => Ok(embedding),
            FaceChoice::NoFace => Err(FindError::NoFaceDetected),
            FaceChoice::Rejected(count) => Err(FindError::MultipleFaces(count)),
        }
    }
}
