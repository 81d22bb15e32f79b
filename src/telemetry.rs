use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    segmentation_duration: Histogram<u64>,
    mask_detections: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        // TODO: deprecated crate to be replaced with an OLTP exporter
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .unwrap();

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("mri_segmentation");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let segmentation_duration = meter
            .u64_histogram("segmentation_duration_ms")
            .with_boundaries(vec![
                10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
            ])
            .with_description("End-to-end duration of segmentation requests in milliseconds")
            .build();

        let mask_detections = meter
            .u64_counter("mask_detections_total")
            .with_description("Segmentation results grouped by whether a tumor mask was found")
            .build();

        Metrics {
            request_counter,
            segmentation_duration,
            mask_detections,
            registry,
        }
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_segmentation_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.segmentation_duration.record(duration_ms, &attributes);
    }

    pub fn record_mask_detected(&self, detected: bool) {
        let attributes = vec![KeyValue::new("detected", detected.to_string())];
        self.mask_detections.add(1, &attributes);
    }
}
