use crate::loaders::EncodedImage;
use serde_json::{Value, json};

/// Where encoded images are embedded in an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePlacement {
    /// v0: the single image travels as the raw request body.
    Data,
    /// v1: images travel as a list inside the JSON payload.
    Json,
}

/// One outbound request package: everything needed to send it, plus the
/// scaling factors of the images it carries, aligned by position.
#[derive(Debug, Clone)]
pub struct RequestData {
    pub url: String,
    pub parameters: Vec<(String, String)>,
    pub payload: Option<Value>,
    pub body: Option<String>,
    pub image_scaling_factors: Vec<Option<f64>>,
}

/// Partition encoded inputs into request packages.
///
/// `Data` placement produces one package per image regardless of the batch
/// ceiling. `Json` placement slices the inputs into consecutive groups of at
/// most `max_batch_size`, so the package count is `ceil(N / max_batch_size)`
/// and the original order is preserved with no overlap.
pub fn prepare_requests_data(
    url: String,
    encoded_inference_inputs: Vec<EncodedImage>,
    parameters: Vec<(String, String)>,
    payload: Option<Value>,
    max_batch_size: usize,
    image_placement: ImagePlacement,
) -> Vec<RequestData> {
    match image_placement {
        ImagePlacement::Data => encoded_inference_inputs
            .into_iter()
            .map(|image| RequestData {
                url: url.clone(),
                parameters: parameters.clone(),
                payload: payload.clone(),
                body: Some(image.payload),
                image_scaling_factors: vec![image.scaling_factor],
            })
            .collect(),
        ImagePlacement::Json => {
            let batch_size = max_batch_size.max(1);
            encoded_inference_inputs
                .chunks(batch_size)
                .map(|batch| {
                    let mut package_payload = payload.clone().unwrap_or_else(|| json!({}));
                    inject_images_into_payload(&mut package_payload, batch, "image");
                    RequestData {
                        url: url.clone(),
                        parameters: parameters.clone(),
                        payload: Some(package_payload),
                        body: None,
                        image_scaling_factors: batch
                            .iter()
                            .map(|image| image.scaling_factor)
                            .collect(),
                    }
                })
                .collect()
        }
    }
}

/// Place encoded images under `key` in a JSON payload.
///
/// A single image becomes a bare object, several become a list; this mirrors
/// what the inference endpoints accept.
pub fn inject_images_into_payload(payload: &mut Value, encoded_images: &[EncodedImage], key: &str) {
    if encoded_images.is_empty() {
        return;
    }
    let serialized: Vec<Value> = encoded_images
        .iter()
        .map(|image| json!({"type": "base64", "value": image.payload}))
        .collect();
    let images_value = if serialized.len() == 1 {
        serialized.into_iter().next().unwrap_or(Value::Null)
    } else {
        Value::Array(serialized)
    };
    if let Some(object) = payload.as_object_mut() {
        object.insert(key.to_string(), images_value);
    }
}
