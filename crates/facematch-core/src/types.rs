use crate::vector::{self, VectorError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f64>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject embeddings whose length differs from the deployment's dimension.
    pub fn ensure_dim(&self, expected: usize) -> Result<(), VectorError> {
        if self.dim() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }

    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f64, VectorError> {
        vector::euclidean_distance(&self.values, &other.values)
    }
}

impl AsRef<[f64]> for Embedding {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}

/// A stored enrollment: the mean of every embedding submitted for one person.
///
/// Identity lives only in the file name the template is stored under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub vector: Vec<f64>,
    /// Number of images averaged into `vector`. Older files call it `numImages`.
    #[serde(alias = "numImages")]
    pub sample_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Template {
    /// Average a set of embeddings into a fresh template.
    pub fn from_embeddings(embeddings: &[Embedding]) -> Result<Self, VectorError> {
        let vector = vector::mean(embeddings)?;
        Ok(Self {
            vector,
            sample_count: embeddings.len() as u32,
            model_version: embeddings.first().and_then(|e| e.model_version.clone()),
            created_at: Some(Utc::now()),
        })
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// Distance from a probe embedding to this template. Lower = closer match.
    pub fn distance_to(&self, probe: &Embedding) -> Result<f64, VectorError> {
        vector::euclidean_distance(&self.vector, &probe.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_from_two_embeddings() {
        let t = Template::from_embeddings(&[
            Embedding::new(vec![1.0, 1.0]),
            Embedding::new(vec![3.0, 3.0]),
        ])
        .unwrap();
        assert_eq!(t.vector, vec![2.0, 2.0]);
        assert_eq!(t.sample_count, 2);
        assert!(t.created_at.is_some());
    }

    #[test]
    fn test_template_from_no_embeddings() {
        assert_eq!(
            Template::from_embeddings(&[]).unwrap_err(),
            VectorError::EmptyInput
        );
    }

    #[test]
    fn test_template_keeps_model_version() {
        let t = Template::from_embeddings(&[
            Embedding::new(vec![0.0]).with_model_version("w600k_r50")
        ])
        .unwrap();
        assert_eq!(t.model_version.as_deref(), Some("w600k_r50"));
    }

    #[test]
    fn test_template_distance() {
        let t = Template {
            vector: vec![0.0, 0.0],
            sample_count: 1,
            model_version: None,
            created_at: None,
        };
        let d = t.distance_to(&Embedding::new(vec![3.0, 4.0])).unwrap();
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_ensure_dim() {
        let e = Embedding::new(vec![0.0; 4]);
        assert!(e.ensure_dim(4).is_ok());
        assert_eq!(
            e.ensure_dim(512).unwrap_err(),
            VectorError::DimensionMismatch { expected: 512, actual: 4 }
        );
    }

    #[test]
    fn test_template_accepts_num_images_alias() {
        let t: Template = serde_json::from_str(r#"{"vector":[1.5,2.5],"numImages":3}"#).unwrap();
        assert_eq!(t.sample_count, 3);
        assert_eq!(t.model_version, None);
    }
}
