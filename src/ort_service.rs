use crate::{
    config::ModelsConfig,
    model_cache::{ModelCache, ModelLoadError, ModelLoader},
    model_service::{ClassVerdict, Classifier, InferenceError, Segmenter},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array, Array4, ArrayD, ArrayView4, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Both artifacts take a 1x3x256x256 normalized RGB tensor.
pub const MODEL_INPUT_SIZE: u32 = 256;

/// Index of the "tumor present" class in the classifier output.
const TUMOR_CLASS_ID: usize = 1;

pub struct OrtModel {
    session: Mutex<Session>,
    output_name: String,
}

impl OrtModel {
    pub fn run(&self, input: ArrayView4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let mut session = self.session.lock();

        let owned_buffer;
        let input_view = if input.is_standard_layout() {
            input
        } else {
            owned_buffer = input.to_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Tensor(format!("failed to build tensor: {}", e)))?;

        let input_tensor = ort::inputs![tensor_ref];

        let outputs = session
            .run(input_tensor)
            .map_err(|e| InferenceError::Session(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Output(format!("failed to extract tensor: {}", e)))?;

        let ix = shape.to_ixdyn();
        let array = ArrayD::from_shape_vec(ix, data.to_vec())
            .map_err(|e| InferenceError::Output(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }

    fn warmup(&self) -> Result<(), InferenceError> {
        let size = MODEL_INPUT_SIZE as usize;
        let input = Array4::<f32>::zeros((1, 3, size, size));
        self.run(input.view()).map(|_| ())
    }
}

pub struct OrtModelLoader;

impl ModelLoader for OrtModelLoader {
    type Model = OrtModel;

    fn load(&self, path: &Path) -> Result<OrtModel, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let load_error = |message: String| ModelLoadError::Load {
            path: path.to_path_buf(),
            message,
        };

        let mut builder = Session::builder()
            .map_err(|e| load_error(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(e.to_string()))?
            .with_memory_pattern(true)
            .map_err(|e| load_error(e.to_string()))?;
        let session = builder
            .commit_from_file(path)
            .map_err(|e| load_error(e.to_string()))?;

        let output_name = session
            .outputs()
            .first()
            .map(|output| output.name().to_string())
            .ok_or_else(|| load_error("model has no outputs".to_string()))?;

        let model = OrtModel {
            session: Mutex::new(session),
            output_name,
        };
        model.warmup().map_err(|e| load_error(e.to_string()))?;

        Ok(model)
    }
}

/// Hands out the classification and segmentation model handles, loading each
/// artifact at most once per process unless it is explicitly reloaded.
pub struct ModelRegistry {
    cache: ModelCache<OrtModelLoader>,
    classification_path: PathBuf,
    segmentation_path: PathBuf,
}

impl ModelRegistry {
    pub fn new(config: &ModelsConfig) -> Self {
        Self {
            cache: ModelCache::new(OrtModelLoader),
            classification_path: config.classification_path(),
            segmentation_path: config.segmentation_path(),
        }
    }

    pub fn classifier(&self) -> Result<OrtClassifier, ModelLoadError> {
        Ok(OrtClassifier {
            model: self.cache.get(&self.classification_path)?,
        })
    }

    pub fn segmenter(&self) -> Result<OrtSegmenter, ModelLoadError> {
        Ok(OrtSegmenter {
            model: self.cache.get(&self.segmentation_path)?,
        })
    }

    /// Drops both cached handles and re-reads the artifacts from disk.
    pub fn reload(&self) -> Result<(), ModelLoadError> {
        self.cache.reload(&self.classification_path)?;
        self.cache.reload(&self.segmentation_path)?;
        Ok(())
    }
}

pub struct OrtClassifier {
    model: Arc<OrtModel>,
}

impl Classifier for OrtClassifier {
    fn classify(&self, input: ArrayView4<f32>) -> Result<ClassVerdict, InferenceError> {
        let output = self.model.run(input)?;

        let scores: Vec<f32> = output.iter().copied().collect();
        if scores.len() < 2 {
            return Err(InferenceError::Output(format!(
                "expected two class scores, got {}",
                scores.len()
            )));
        }

        // argmax is invariant under softmax, so logits and pre-normalized
        // scores are handled alike.
        let probabilities = softmax(&scores);
        let (class_id, confidence) = probabilities
            .iter()
            .enumerate()
            .map(|(index, value)| (index, *value))
            .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            .unwrap();

        Ok(ClassVerdict {
            tumor_detected: class_id == TUMOR_CLASS_ID,
            confidence,
        })
    }
}

pub struct OrtSegmenter {
    model: Arc<OrtModel>,
}

impl Segmenter for OrtSegmenter {
    fn segment(&self, input: ArrayView4<f32>) -> Result<ndarray::Array2<f32>, InferenceError> {
        let output = self.model.run(input)?;

        let mask = output
            .into_dimensionality::<Ix4>()
            .map_err(|e| InferenceError::Output(format!("expected an NCHW mask: {}", e)))?;
        if mask.shape()[0] != 1 || mask.shape()[1] != 1 {
            return Err(InferenceError::Output(format!(
                "expected a single-channel mask batch of one, got {:?}",
                mask.shape()
            )));
        }

        Ok(mask.index_axis_move(Axis(0), 0).index_axis_move(Axis(0), 0))
    }
}

fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Resizes the upload to the model input size and lays it out as a
/// normalized NCHW tensor.
pub fn image_to_tensor(image: &DynamicImage) -> Array4<f32> {
    let size = MODEL_INPUT_SIZE as usize;
    let img = image.resize_exact(MODEL_INPUT_SIZE, MODEL_INPUT_SIZE, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_image_to_tensor_shape_and_scaling() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 100, Rgb([255, 0, 0]));
        let img = DynamicImage::ImageRgb8(img);

        let input = image_to_tensor(&img);

        assert_eq!(input.shape(), &[1, 3, 256, 256]);
        assert!((input[[0, 0, 128, 128]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 1, 128, 128]].abs() < 1e-6);
        assert!(input[[0, 2, 128, 128]].abs() < 1e-6);
    }

    #[test]
    fn test_softmax_normalizes_and_keeps_order() {
        let probabilities = softmax(&[1.0, 3.0]);

        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probabilities[1] > probabilities[0]);
    }

    #[test]
    fn test_registry_surfaces_missing_artifacts() {
        let config = ModelsConfig {
            model_dir: "does-not-exist".into(),
            classification_file: "clf.onnx".to_string(),
            segmentation_file: "seg.onnx".to_string(),
        };
        let registry = ModelRegistry::new(&config);

        assert!(matches!(
            registry.classifier(),
            Err(ModelLoadError::NotFound(_))
        ));
        assert!(matches!(
            registry.segmenter(),
            Err(ModelLoadError::NotFound(_))
        ));
    }
}
