use crate::{
    overlay::{self, OverlayError},
    prediction::PredictionError,
    server::SharedState,
};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use image::ImageReader;
use std::{io::Cursor, time::Instant};
use thiserror::Error;
use tracing::instrument;

pub const MASK_DETECTED_HEADER: &str = "x-mask-detected";

#[derive(Error, Debug)]
pub enum SegmentImageError {
    #[error("failed to decode uploaded image: {0}")]
    ImageDecode(String),
    #[error("{0}")]
    Prediction(#[from] PredictionError),
    #[error("overlay failed: {0}")]
    Overlay(#[from] OverlayError),
    #[error("failed to encode result image: {0}")]
    ImageEncode(String),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl SegmentImageError {
    fn status_code(&self) -> StatusCode {
        match self {
            SegmentImageError::ImageDecode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SegmentImageError::Prediction(
                PredictionError::ClassifierUnavailable(_)
                | PredictionError::SegmenterUnavailable(_),
            ) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SegmentImageError {
    fn into_response(self) -> Response {
        tracing::error!("segmentation request failed: {}", self);
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Upload handler: raw image bytes in, overlay PNG out. Whether a mask was
/// found travels in the `x-mask-detected` header so the page can show its
/// notice without parsing the image.
#[instrument(skip(state, image_data))]
pub async fn segment_image(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Response, SegmentImageError> {
    state.metrics.record_request("/segment");
    let started = Instant::now();

    let image = ImageReader::new(Cursor::new(image_data.as_ref()))
        .with_guessed_format()
        .map_err(|e| SegmentImageError::ImageDecode(e.to_string()))?
        .decode()
        .map_err(|e| SegmentImageError::ImageDecode(e.to_string()))?;

    let result = state.segmentation.segment(&image)?;
    let overlay = overlay::compose(&image, &result.mask)?;

    let mut png = Vec::new();
    overlay
        .image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| SegmentImageError::ImageEncode(e.to_string()))?;

    state
        .metrics
        .record_segmentation_duration(started.elapsed().as_millis() as u64, "/segment");
    state.metrics.record_mask_detected(!overlay.mask_empty);
    tracing::info!(
        has_mask = result.has_mask,
        tumor_confidence = result.tumor_confidence,
        duration_ms = started.elapsed().as_millis() as u64,
        "segmentation request served"
    );

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(
            MASK_DETECTED_HEADER,
            if overlay.mask_empty { "false" } else { "true" },
        )
        .body(Body::from(png))
        .map_err(|e| SegmentImageError::HttpBuilder(e.to_string()))?;

    Ok(response)
}
