//! Boundary between the matching engine and face recognition models.
//!
//! The engine only needs two things from the outside world: turning image
//! bytes into embeddings, and measuring how far apart two embeddings are.
//! [`FaceCapability`] is that seam; [`VisionCapability`] fills it with the
//! YuNet + SFace pipeline, tests fill it with fixed vectors.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, PoisonError};

use anyhow::{Context, Result};
use facefind_vision::{Pipeline, PipelineOptions};
use log::{info, warn};

use crate::config::{Config, MultiFacePolicy};
use crate::error::ExtractError;
use crate::Embedding;

pub trait FaceCapability: Send + Sync {
    /// Embeddings of every face in `image`, in the order the extractor
    /// ranks them. Returns `ExtractError::NoFace` (or an empty vector) when
    /// nothing is found.
    fn extract_embeddings(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError>;

    fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        a.euclidean_distance(b)
    }
}

/// Outcome of applying a [`MultiFacePolicy`] to an extraction result.
#[derive(Debug)]
pub enum FaceChoice {
    NoFace,
    One(Embedding),
    Rejected(usize),
}

/// Reduce the faces of one image to a single embedding. `source` only
/// names the image in the warning.
pub fn choose_face(faces: Vec<Embedding>, policy: MultiFacePolicy, source: &str) -> FaceChoice {
    let count = faces.len();
    if count > 1 {
        match policy {
            MultiFacePolicy::Reject => return FaceChoice::Rejected(count),
            MultiFacePolicy::First => {
                warn!("{} contains {} faces, using the first one", source, count)
            }
        }
    }
    match faces.into_iter().next() {
        Some(face) => FaceChoice::One(face),
        None => FaceChoice::NoFace,
    }
}

/// Blocking pool of interchangeable values. A checkout waits until any
/// value comes back, never on one value in particular.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    returned: Condvar,
    size: usize,
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            size: items.len(),
            idle: Mutex::new(items),
            returned: Condvar::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn checkout(&self) -> Pooled<'_, T> {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = idle.pop() {
                return Pooled {
                    pool: self,
                    item: Some(item),
                };
            }
            idle = self
                .returned
                .wait(idle)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn give_back(&self, item: T) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(item);
        self.returned.notify_one();
    }
}

/// A value checked out of a [`Pool`]; returned on drop, unwinding included.
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled value taken before drop"))
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled value taken before drop"))
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

/// ONNX-backed capability. Each pipeline serves one request at a time;
/// requests share a pool of them.
pub struct VisionCapability {
    pipelines: Pool<Pipeline>,
}

impl VisionCapability {
    pub fn load(cfg: &Config) -> Result<Self> {
        let options = PipelineOptions {
            score_threshold: cfg.detection_score,
            nms_threshold: cfg.nms_threshold,
        };
        let pipelines = (0..cfg.workers.max(1))
            .map(|_| Pipeline::load(&cfg.detector_model, &cfg.recognizer_model, options))
            .collect::<Result<Vec<_>>>()
            .context("Failed to initialize face recognition pipeline")?;
        info!("Loaded {} face recognition pipeline(s)", pipelines.len());
        Ok(Self {
            pipelines: Pool::new(pipelines),
        })
    }
}

impl FaceCapability for VisionCapability {
    fn extract_embeddings(&self, image: &[u8]) -> Result<Vec<Embedding>, ExtractError> {
        let img = image::load_from_memory(image)?;
        let embeddings = self
            .pipelines
            .checkout()
            .extract_embeddings(&img)
            .map_err(ExtractError::Model)?;
        if embeddings.is_empty() {
            return Err(ExtractError::NoFace);
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(v: f32) -> Embedding {
        Embedding::from_vec(vec![v; 4])
    }

    #[test]
    fn single_face_is_used() {
        match choose_face(vec![emb(1.0)], MultiFacePolicy::Reject, "x") {
            FaceChoice::One(e) => assert_eq!(e, emb(1.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn first_policy_takes_first_face() {
        match choose_face(vec![emb(1.0), emb(2.0)], MultiFacePolicy::First, "x") {
            FaceChoice::One(e) => assert_eq!(e, emb(1.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reject_policy_reports_count() {
        let faces = vec![emb(1.0), emb(2.0), emb(3.0)];
        assert!(matches!(
            choose_face(faces, MultiFacePolicy::Reject, "x"),
            FaceChoice::Rejected(3)
        ));
    }

    #[test]
    fn no_faces() {
        assert!(matches!(
            choose_face(Vec::new(), MultiFacePolicy::First, "x"),
            FaceChoice::NoFace
        ));
    }

    #[test]
    fn pooled_value_returns_on_drop() {
        let pool = Pool::new(vec![7]);
        {
            let mut item = pool.checkout();
            *item += 1;
        }
        assert_eq!(*pool.checkout(), 8);
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn checkout_skips_busy_values() {
        let pool = Pool::new(vec![1, 2]);
        let held = pool.checkout();
        let free = pool.checkout();
        assert_ne!(*held, *free);
    }

    #[test]
    fn waiter_takes_whichever_value_comes_back_first() {
        let pool = Pool::new(vec!["a", "b"]);
        let first = pool.checkout();
        let second = pool.checkout();
        let second_value = *second;

        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| *pool.checkout());
            std::thread::sleep(std::time::Duration::from_millis(20));
            drop(second);
            assert_eq!(waiter.join().unwrap(), second_value);
        });
        drop(first);
    }

    #[test]
    fn value_survives_a_panicking_holder() {
        let pool = Pool::new(vec![1]);
        std::thread::scope(|scope| {
            let holder = scope.spawn(|| {
                let _item = pool.checkout();
                panic!("request failed mid-inference");
            });
            assert!(holder.join().is_err());
        });
        assert_eq!(*pool.checkout(), 1);
    }
}
