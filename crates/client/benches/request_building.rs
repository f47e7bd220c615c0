use client::loaders::EncodedImage;
use client::post_processing::adjust_prediction_to_client_scaling_factor;
use client::requests::{ImagePlacement, prepare_requests_data};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

/// Pre-encoded inputs; the payload content is irrelevant to packaging cost.
fn create_encoded_inputs(count: usize) -> Vec<EncodedImage> {
    (0..count)
        .map(|index| EncodedImage {
            payload: format!("cGF5bG9hZC0{index}"),
            scaling_factor: Some(0.5),
        })
        .collect()
}

fn create_detection_prediction(detections: usize) -> serde_json::Value {
    let predictions: Vec<_> = (0..detections)
        .map(|index| {
            json!({
                "x": 100.0 + index as f64,
                "y": 200.0,
                "width": 50.0,
                "height": 40.0,
                "class": "object",
                "confidence": 0.9,
                "points": [{"x": 10.0, "y": 20.0}, {"x": 30.0, "y": 40.0}]
            })
        })
        .collect();
    json!({"predictions": predictions})
}

fn benchmark_request_packaging(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_packaging");

    for batch_size in [1usize, 8, 32] {
        let inputs = create_encoded_inputs(1000);
        group.bench_with_input(
            BenchmarkId::new("json_placement", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    prepare_requests_data(
                        black_box("http://localhost:9001/infer/object_detection".to_string()),
                        black_box(inputs.clone()),
                        Vec::new(),
                        Some(json!({"api_key": "key", "model_id": "coins/3"})),
                        batch_size,
                        ImagePlacement::Json,
                    )
                });
            },
        );
    }

    group.finish();
}

fn benchmark_scaling_correction(c: &mut Criterion) {
    let mut group = c.benchmark_group("scaling_correction");

    for detections in [10usize, 100, 1000] {
        let prediction = create_detection_prediction(detections);
        group.bench_with_input(
            BenchmarkId::new("detections", detections),
            &prediction,
            |b, prediction| {
                b.iter(|| {
                    let mut prediction = prediction.clone();
                    adjust_prediction_to_client_scaling_factor(
                        black_box(&mut prediction),
                        Some(0.5),
                    );
                    prediction
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_request_packaging,
    benchmark_scaling_correction
);
criterion_main!(benches);
