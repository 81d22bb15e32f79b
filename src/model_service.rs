use ndarray::{Array2, ArrayView4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to build input tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Session(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

#[derive(Debug, Clone, Copy)]
pub struct ClassVerdict {
    pub tumor_detected: bool,
    pub confidence: f32,
}

pub trait Classifier: Send + Sync {
    fn classify(&self, input: ArrayView4<f32>) -> Result<ClassVerdict, InferenceError>;
}

pub trait Segmenter: Send + Sync {
    /// Returns the raw sigmoid mask, spatial dimensions `(height, width)`,
    /// with entries in `[0, 1]`.
    fn segment(&self, input: ArrayView4<f32>) -> Result<Array2<f32>, InferenceError>;
}
