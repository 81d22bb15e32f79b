use crate::{
    losses,
    model_cache::ModelLoadError,
    model_service::{Classifier, InferenceError, Segmenter},
    ort_service::{image_to_tensor, ModelRegistry},
};
use image::DynamicImage;
use ndarray::Array2;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Spatial dimensions of the predicted mask, matching the overlay canvas.
pub const MASK_SIZE: usize = 256;

/// Sigmoid cutoff above which a pixel counts as tumor.
pub const MASK_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("classification model unavailable: {0}")]
    ClassifierUnavailable(ModelLoadError),
    #[error("segmentation model unavailable: {0}")]
    SegmenterUnavailable(ModelLoadError),
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),
    #[error("predicted mask is {got_height}x{got_width}, expected {MASK_SIZE}x{MASK_SIZE}")]
    MaskShape { got_height: usize, got_width: usize },
}

/// A plain 2D binary mask plus the classifier verdict.
#[derive(Debug)]
pub struct PredictionResult {
    pub mask: Array2<f32>,
    pub has_mask: bool,
    pub tumor_confidence: f32,
}

/// Runs the two-stage prediction. The classifier gates the segmentation
/// model: an upload classified as tumor-free returns an all-zero mask
/// without running it.
#[instrument(skip_all)]
pub fn segment_mri<C, S>(
    image: &DynamicImage,
    classifier: &C,
    segmenter: &S,
) -> Result<PredictionResult, PredictionError>
where
    C: Classifier,
    S: Segmenter,
{
    let input = image_to_tensor(image);

    let verdict = classifier.classify(input.view())?;
    if !verdict.tumor_detected {
        tracing::debug!(
            confidence = verdict.confidence,
            "classifier found no tumor, skipping segmentation"
        );
        return Ok(PredictionResult {
            mask: Array2::zeros((MASK_SIZE, MASK_SIZE)),
            has_mask: false,
            tumor_confidence: verdict.confidence,
        });
    }

    let raw = segmenter.segment(input.view())?;
    let (height, width) = raw.dim();
    if (height, width) != (MASK_SIZE, MASK_SIZE) {
        return Err(PredictionError::MaskShape {
            got_height: height,
            got_width: width,
        });
    }

    let mask = raw.mapv(|v| if v >= MASK_THRESHOLD { 1.0 } else { 0.0 });
    tracing::debug!(
        confidence = verdict.confidence,
        agreement = losses::tversky(mask.view(), raw.view()),
        "segmentation complete"
    );

    Ok(PredictionResult {
        mask,
        has_mask: verdict.tumor_detected,
        tumor_confidence: verdict.confidence,
    })
}

/// Resolves both model handles from the registry before predicting, so a
/// missing artifact surfaces as a typed, per-request error.
pub struct SegmentationService {
    registry: Arc<ModelRegistry>,
}

impl SegmentationService {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn segment(&self, image: &DynamicImage) -> Result<PredictionResult, PredictionError> {
        let classifier = self
            .registry
            .classifier()
            .map_err(PredictionError::ClassifierUnavailable)?;
        let segmenter = self
            .registry
            .segmenter()
            .map_err(PredictionError::SegmenterUnavailable)?;

        segment_mri(image, &classifier, &segmenter)
    }

    /// Swaps in freshly read artifacts, e.g. after replacing the files on disk.
    pub fn reload_models(&self) -> Result<(), ModelLoadError> {
        self.registry.reload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ModelsConfig,
        model_service::{ClassVerdict, InferenceError},
    };
    use image::{ImageBuffer, Rgb};
    use ndarray::ArrayView4;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockClassifier {
        tumor: bool,
    }

    impl Classifier for MockClassifier {
        fn classify(&self, _input: ArrayView4<f32>) -> Result<ClassVerdict, InferenceError> {
            Ok(ClassVerdict {
                tumor_detected: self.tumor,
                confidence: 0.93,
            })
        }
    }

    /// Returns a soft circular blob centered on the canvas and counts calls.
    struct CircleSegmenter {
        calls: AtomicUsize,
        radius: f32,
    }

    impl CircleSegmenter {
        fn new(radius: f32) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                radius,
            }
        }
    }

    impl Segmenter for CircleSegmenter {
        fn segment(&self, _input: ArrayView4<f32>) -> Result<Array2<f32>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let center = MASK_SIZE as f32 / 2.0;
            Ok(Array2::from_shape_fn((MASK_SIZE, MASK_SIZE), |(y, x)| {
                let dy = y as f32 - center;
                let dx = x as f32 - center;
                if (dy * dy + dx * dx).sqrt() < self.radius {
                    0.9
                } else {
                    0.1
                }
            }))
        }
    }

    struct WrongShapeSegmenter;

    impl Segmenter for WrongShapeSegmenter {
        fn segment(&self, _input: ArrayView4<f32>) -> Result<Array2<f32>, InferenceError> {
            Ok(Array2::zeros((128, 128)))
        }
    }

    fn test_image() -> DynamicImage {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(300, 300, Rgb([90, 90, 90]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_no_tumor_short_circuits_the_segmenter() {
        let classifier = MockClassifier { tumor: false };
        let segmenter = CircleSegmenter::new(40.0);

        let result = segment_mri(&test_image(), &classifier, &segmenter).unwrap();

        assert!(!result.has_mask);
        assert!(result.mask.iter().all(|v| *v == 0.0));
        assert_eq!(result.mask.dim(), (MASK_SIZE, MASK_SIZE));
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tumor_runs_the_segmenter_and_binarizes() {
        let classifier = MockClassifier { tumor: true };
        let segmenter = CircleSegmenter::new(40.0);

        let result = segment_mri(&test_image(), &classifier, &segmenter).unwrap();

        assert!(result.has_mask);
        assert_eq!(segmenter.calls.load(Ordering::SeqCst), 1);
        assert!(result.mask.iter().all(|v| *v == 0.0 || *v == 1.0));
        assert_eq!(result.mask[[128, 128]], 1.0);
        assert_eq!(result.mask[[5, 5]], 0.0);
    }

    #[test]
    fn test_wrong_mask_shape_is_a_typed_error() {
        let classifier = MockClassifier { tumor: true };

        let result = segment_mri(&test_image(), &classifier, &WrongShapeSegmenter);

        assert!(matches!(
            result,
            Err(PredictionError::MaskShape {
                got_height: 128,
                got_width: 128
            })
        ));
    }

    #[test]
    fn test_upload_to_overlay_end_to_end() {
        let classifier = MockClassifier { tumor: true };
        let segmenter = CircleSegmenter::new(40.0);

        let result = segment_mri(&test_image(), &classifier, &segmenter).unwrap();
        let overlay = crate::overlay::compose(&test_image(), &result.mask).unwrap();

        assert!(!overlay.mask_empty);
        assert_eq!(overlay.image.dimensions(), (256, 256));

        let inside = overlay.image.get_pixel(128, 128);
        assert!(inside[0] > inside[1]);
        let outside = overlay.image.get_pixel(5, 5);
        assert_eq!(outside[0], outside[1]);
    }

    #[test]
    fn test_missing_artifacts_surface_as_unavailable() {
        let config = ModelsConfig {
            model_dir: "does-not-exist".into(),
            classification_file: "clf.onnx".to_string(),
            segmentation_file: "seg.onnx".to_string(),
        };
        let service = SegmentationService::new(Arc::new(ModelRegistry::new(&config)));

        let result = service.segment(&test_image());

        assert!(matches!(
            result,
            Err(PredictionError::ClassifierUnavailable(_))
        ));
    }
}
