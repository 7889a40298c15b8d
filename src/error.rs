use std::path::PathBuf;

/// Failure of the face extraction capability.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no face detected")]
    NoFace,
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face model failed: {0:#}")]
    Model(anyhow::Error),
}

/// Fatal problems while building the identity index. Any of these stops
/// startup before the service binds.
#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("training directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no jpg, jpeg or png images in {}", .0.display())]
    NoImages(PathBuf),
    #[error("no face detected in training image {}", .0.display())]
    NoFaceDetected(PathBuf),
    #[error("training image {} contains {count} faces", .path.display())]
    MultipleFaces { path: PathBuf, count: usize },
    #[error("embedding of {} has {actual} components, expected {expected}", .path.display())]
    DimensionMismatch {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
    #[error("extracting faces from {}: {source}", .path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },
}

/// Per-request lookup failures. None of these affect the index.
#[derive(Debug, thiserror::Error)]
pub enum FindError {
    #[error("image is empty")]
    EmptyImage,
    #[error("only jpg, jpeg and png images are allowed")]
    UnsupportedImage,
    #[error("no face detected")]
    NoFaceDetected,
    #[error("image contains {0} faces")]
    MultipleFaces(usize),
    #[error("query embedding has {actual} components, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Extraction(ExtractError),
}

impl From<ExtractError> for FindError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFace => FindError::NoFaceDetected,
            other => FindError::Extraction(other),
        }
    }
}

impl FindError {
    /// Whether the caller sent something unusable, as opposed to the
    /// service failing.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FindError::Extraction(ExtractError::Model(_)))
    }
}
