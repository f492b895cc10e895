//! The embedding collaborator: one photo in, one face embedding out.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{0} faces detected; exactly one is required")]
    MultipleFaces(usize),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("embedding engine is not running")]
    EngineUnavailable,
}

/// What to do when a photo contains more than one face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiFacePolicy {
    /// Use the highest-confidence detection.
    #[default]
    First,
    /// Fail with [`EmbedError::MultipleFaces`].
    Reject,
}

impl MultiFacePolicy {
    /// Choose the face to embed from detections sorted by confidence.
    pub fn select<'a>(&self, faces: &'a [BoundingBox]) -> Result<&'a BoundingBox, EmbedError> {
        match (faces, self) {
            ([], _) => Err(EmbedError::NoFaceDetected),
            ([_, _, ..], MultiFacePolicy::Reject) => Err(EmbedError::MultipleFaces(faces.len())),
            ([first, ..], _) => Ok(first),
        }
    }
}

impl std::str::FromStr for MultiFacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown multi-face policy {other:?} (expected first|reject)")),
        }
    }
}

/// Async face embedding.
///
/// Implementations must be cheap to share: the pipelines hold one instance
/// for the life of the process and call it from many requests at once.
pub trait Embedder: Send + Sync + 'static {
    fn embed(&self, image: RgbImage) -> impl Future<Output = Result<Embedding, EmbedError>> + Send;
}

/// SCRFD detection followed by ArcFace recognition.
///
/// Blocking and `&mut`; run it on a dedicated thread (see [`crate::engine`]).
pub struct OnnxEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    policy: MultiFacePolicy,
}

impl OnnxEmbedder {
    pub fn load(detector_path: &Path, recognizer_path: &Path, policy: MultiFacePolicy) -> Result<Self, EmbedError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self {
            detector,
            recognizer,
            policy,
        })
    }

    pub fn embed(&mut self, image: &RgbImage) -> Result<Embedding, EmbedError> {
        let faces = self.detector.detect(image)?;
        let face = self.policy.select(&faces)?;
        tracing::debug!(
            detected = faces.len(),
            confidence = face.confidence,
            "embedding selected face"
        );
        Ok(self.recognizer.extract(image, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(conf: f32) -> BoundingBox {
        BoundingBox {
            x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: conf, landmarks: None,
        }
    }

    #[test]
    fn test_select_no_faces() {
        for policy in [MultiFacePolicy::First, MultiFacePolicy::Reject] {
            assert!(matches!(policy.select(&[]), Err(EmbedError::NoFaceDetected)));
        }
    }

    #[test]
    fn test_select_single_face() {
        let faces = [face(0.8)];
        for policy in [MultiFacePolicy::First, MultiFacePolicy::Reject] {
            assert_eq!(policy.select(&faces).unwrap().confidence, 0.8);
        }
    }

    #[test]
    fn test_select_first_of_many() {
        let faces = [face(0.9), face(0.6)];
        assert_eq!(MultiFacePolicy::First.select(&faces).unwrap().confidence, 0.9);
    }

    #[test]
    fn test_reject_many() {
        let faces = [face(0.9), face(0.6), face(0.55)];
        assert!(matches!(
            MultiFacePolicy::Reject.select(&faces),
            Err(EmbedError::MultipleFaces(3))
        ));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("first".parse::<MultiFacePolicy>().unwrap(), MultiFacePolicy::First);
        assert_eq!(" Reject ".parse::<MultiFacePolicy>().unwrap(), MultiFacePolicy::Reject);
        assert!("largest".parse::<MultiFacePolicy>().is_err());
    }

    #[test]
    fn test_load_missing_models() {
        let err = OnnxEmbedder::load(
            Path::new("/nonexistent/det_10g.onnx"),
            Path::new("/nonexistent/w600k_r50.onnx"),
            MultiFacePolicy::First,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmbedError::Detector(DetectorError::ModelNotFound(_))));
    }
}
