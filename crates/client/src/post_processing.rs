use crate::entities::{Visualisation, VisualisationFormat};
use crate::errors::Result;
use crate::executors::ApiResponse;
use crate::requests::RequestData;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;

/// One normalized prediction: the JSON payload with spatial fields mapped
/// back to original-image coordinates, plus the visualisation (if requested)
/// decoded into the configured representation.
#[derive(Debug, Clone)]
pub struct InferenceResponse {
    pub prediction: Value,
    pub visualisation: Option<Visualisation>,
}

/// Final shape of an inference call.
///
/// A single-image input yields `Single`; a list input always yields `Batch`
/// in input order, even with one element.
#[derive(Debug)]
pub enum InferenceOutput {
    Single(InferenceResponse),
    Batch(Vec<InferenceResponse>),
}

impl InferenceOutput {
    pub(crate) fn from_parts(mut results: Vec<InferenceResponse>, unwrap_single: bool) -> Self {
        if unwrap_single && results.len() == 1 {
            return InferenceOutput::Single(results.remove(0));
        }
        InferenceOutput::Batch(results)
    }

    pub fn is_single(&self) -> bool {
        matches!(self, InferenceOutput::Single(_))
    }

    /// Flatten into a list, losing the single/batch distinction.
    pub fn into_vec(self) -> Vec<InferenceResponse> {
        match self {
            InferenceOutput::Single(response) => vec![response],
            InferenceOutput::Batch(responses) => responses,
        }
    }
}

/// Decode raw visualisation bytes into the requested representation.
pub fn transform_visualisation_bytes(
    visualisation: &[u8],
    expected_format: VisualisationFormat,
) -> Result<Visualisation> {
    match expected_format {
        VisualisationFormat::Base64 => Ok(Visualisation::Base64(STANDARD.encode(visualisation))),
        VisualisationFormat::JpegBytes => Ok(Visualisation::Bytes(visualisation.to_vec())),
        VisualisationFormat::Image => {
            Ok(Visualisation::Image(image::load_from_memory(visualisation)?))
        }
    }
}

/// Decode a base64 visualisation field into the requested representation.
pub fn transform_base64_visualisation(
    visualisation: &str,
    expected_format: VisualisationFormat,
) -> Result<Visualisation> {
    if expected_format == VisualisationFormat::Base64 {
        return Ok(Visualisation::Base64(visualisation.to_string()));
    }
    let bytes = STANDARD.decode(visualisation.as_bytes())?;
    transform_visualisation_bytes(&bytes, expected_format)
}

/// Map spatial prediction fields back into original-image coordinates.
///
/// The factor is resized/original, so the correction divides each coordinate
/// by it. Applied per image with that image's own factor; `None` and `1.0`
/// are no-ops. Corrected fields: `x`, `y`, `width`, `height` on each entry of
/// `predictions`, plus the `x`/`y` of every `points` and `keypoints` element.
pub fn adjust_prediction_to_client_scaling_factor(
    prediction: &mut Value,
    scaling_factor: Option<f64>,
) {
    let Some(factor) = scaling_factor else {
        return;
    };
    if factor == 1.0 {
        return;
    }
    let Some(predictions) = prediction
        .get_mut("predictions")
        .and_then(Value::as_array_mut)
    else {
        return;
    };
    for element in predictions {
        for key in ["x", "y", "width", "height"] {
            divide_in_place(element, key, factor);
        }
        for nested in ["points", "keypoints"] {
            if let Some(entries) = element.get_mut(nested).and_then(Value::as_array_mut) {
                for entry in entries {
                    divide_in_place(entry, "x", factor);
                    divide_in_place(entry, "y", factor);
                }
            }
        }
    }
}

fn divide_in_place(object: &mut Value, key: &str, factor: f64) {
    if let Some(field) = object.get_mut(key) {
        if let Some(number) = field.as_f64() {
            *field = Value::from(number / factor);
        }
    }
}

/// Normalize one v0 response: raw image bytes become a visualisation-only
/// result, JSON predictions get the scaling correction of the single image
/// the package carried.
pub fn normalize_v0_response(
    request_data: &RequestData,
    response: &ApiResponse,
    expected_format: VisualisationFormat,
) -> Result<InferenceResponse> {
    if response.is_image() {
        let visualisation = transform_visualisation_bytes(&response.body, expected_format)?;
        return Ok(InferenceResponse {
            prediction: Value::Null,
            visualisation: Some(visualisation),
        });
    }
    let mut prediction = response.json()?;
    let scaling_factor = request_data.image_scaling_factors.first().copied().flatten();
    adjust_prediction_to_client_scaling_factor(&mut prediction, scaling_factor);
    Ok(InferenceResponse {
        prediction,
        visualisation: None,
    })
}

/// Normalize one v1 response into per-image results.
///
/// A bare object (single-image request) is first promoted to a one-element
/// list so results always index by image position; each element is then
/// paired with its own scaling factor and its base64 visualisation field is
/// decoded into the configured format.
pub fn normalize_v1_response(
    request_data: &RequestData,
    response: &ApiResponse,
    expected_format: VisualisationFormat,
) -> Result<Vec<InferenceResponse>> {
    let parsed = response.json()?;
    let elements = match parsed {
        Value::Array(elements) => elements,
        single => vec![single],
    };
    let mut results = Vec::with_capacity(elements.len());
    for (mut element, scaling_factor) in elements
        .into_iter()
        .zip(request_data.image_scaling_factors.iter().copied())
    {
        let visualisation = match extract_visualisation(&mut element) {
            Some(payload) => Some(transform_base64_visualisation(&payload, expected_format)?),
            None => None,
        };
        adjust_prediction_to_client_scaling_factor(&mut element, scaling_factor);
        results.push(InferenceResponse {
            prediction: element,
            visualisation,
        });
    }
    Ok(results)
}

fn extract_visualisation(element: &mut Value) -> Option<String> {
    let object = element.as_object_mut()?;
    match object.remove("visualization") {
        Some(Value::String(payload)) => Some(payload),
        Some(Value::Null) | None => None,
        Some(other) => {
            // Unexpected shape, keep it in the prediction untouched.
            object.insert("visualization".to_string(), other);
            None
        }
    }
}

/// Split batched embedding responses into one entry per image.
///
/// Each package response carries an `embeddings` list covering its whole
/// image slice; callers index results by image, so every embedding gets its
/// own object with the remaining fields copied over.
pub fn combine_embeddings(responses: Vec<Value>) -> Vec<Value> {
    let mut combined = Vec::new();
    for response in responses {
        let Some(embeddings) = response.get("embeddings").and_then(Value::as_array) else {
            combined.push(response);
            continue;
        };
        for embedding in embeddings.clone() {
            let mut entry = response.clone();
            if let Some(object) = entry.as_object_mut() {
                object.insert("embeddings".to_string(), Value::Array(vec![embedding]));
            }
            combined.push(entry);
        }
    }
    combined
}

/// Flatten per-package gaze responses (each a list of per-image detections)
/// into one list indexed by image position.
pub fn combine_gaze_detections(responses: Vec<Value>) -> Vec<Value> {
    let mut combined = Vec::new();
    for response in responses {
        match response {
            Value::Array(elements) => combined.extend(elements),
            single => combined.push(single),
        }
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detection_prediction() -> Value {
        json!({
            "predictions": [
                {
                    "x": 20.0,
                    "y": 40.0,
                    "width": 10.0,
                    "height": 8.0,
                    "confidence": 0.9,
                    "class": "dog",
                    "points": [{"x": 5.0, "y": 2.5}],
                    "keypoints": [{"x": 1.0, "y": 3.0, "confidence": 0.8}]
                }
            ],
            "time": 0.05
        })
    }

    #[test]
    fn test_scaling_correction_divides_spatial_fields() {
        let mut prediction = detection_prediction();
        adjust_prediction_to_client_scaling_factor(&mut prediction, Some(0.5));
        let element = &prediction["predictions"][0];
        assert_eq!(element["x"], 40.0, "x' / f must map back to original space");
        assert_eq!(element["y"], 80.0);
        assert_eq!(element["width"], 20.0);
        assert_eq!(element["height"], 16.0);
        assert_eq!(element["points"][0]["x"], 10.0);
        assert_eq!(element["points"][0]["y"], 5.0);
        assert_eq!(element["keypoints"][0]["x"], 2.0);
        assert_eq!(
            element["confidence"], 0.9,
            "Non-spatial fields must not be touched"
        );
        assert_eq!(prediction["time"], 0.05);
    }

    #[test]
    fn test_scaling_correction_noop_for_unit_or_missing_factor() {
        let mut prediction = detection_prediction();
        adjust_prediction_to_client_scaling_factor(&mut prediction, Some(1.0));
        assert_eq!(prediction, detection_prediction(), "Factor 1.0 is a no-op");

        let mut prediction = detection_prediction();
        adjust_prediction_to_client_scaling_factor(&mut prediction, None);
        assert_eq!(prediction, detection_prediction(), "No factor is a no-op");
    }

    #[test]
    fn test_v1_single_object_promoted_to_positional_list() {
        let request_data = RequestData {
            url: String::new(),
            parameters: Vec::new(),
            payload: None,
            body: None,
            image_scaling_factors: vec![Some(0.5)],
        };
        let response = ApiResponse {
            content_type: Some("application/json".to_string()),
            body: detection_prediction().to_string().into_bytes(),
        };
        let results =
            normalize_v1_response(&request_data, &response, VisualisationFormat::Base64).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].prediction["predictions"][0]["x"], 40.0);
    }

    #[test]
    fn test_v1_batch_uses_per_image_factors() {
        let request_data = RequestData {
            url: String::new(),
            parameters: Vec::new(),
            payload: None,
            body: None,
            image_scaling_factors: vec![Some(0.5), None],
        };
        let body = json!([
            {"predictions": [{"x": 10.0, "y": 10.0, "width": 4.0, "height": 4.0}]},
            {"predictions": [{"x": 10.0, "y": 10.0, "width": 4.0, "height": 4.0}]}
        ]);
        let response = ApiResponse {
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        };
        let results =
            normalize_v1_response(&request_data, &response, VisualisationFormat::Base64).unwrap();
        assert_eq!(
            results[0].prediction["predictions"][0]["x"], 20.0,
            "First image was downsized and must be corrected"
        );
        assert_eq!(
            results[1].prediction["predictions"][0]["x"], 10.0,
            "Second image was untouched, factors are never shared across a batch"
        );
    }

    #[test]
    fn test_v1_visualisation_field_is_extracted_and_decoded() {
        let request_data = RequestData {
            url: String::new(),
            parameters: Vec::new(),
            payload: None,
            body: None,
            image_scaling_factors: vec![None],
        };
        let body = json!({"predictions": [], "visualization": "AQID"});
        let response = ApiResponse {
            content_type: Some("application/json".to_string()),
            body: body.to_string().into_bytes(),
        };
        let results =
            normalize_v1_response(&request_data, &response, VisualisationFormat::JpegBytes)
                .unwrap();
        match &results[0].visualisation {
            Some(Visualisation::Bytes(bytes)) => assert_eq!(bytes, &vec![1, 2, 3]),
            other => panic!("Expected decoded bytes, got {other:?}"),
        }
        assert!(
            results[0].prediction.get("visualization").is_none(),
            "The decoded field must leave the prediction payload"
        );
    }

    #[test]
    fn test_v0_image_response_becomes_visualisation_only() {
        let request_data = RequestData {
            url: String::new(),
            parameters: Vec::new(),
            payload: None,
            body: None,
            image_scaling_factors: vec![Some(0.5)],
        };
        let response = ApiResponse {
            content_type: Some("image/jpeg".to_string()),
            body: vec![0xFF, 0xD8, 0xFF],
        };
        let result =
            normalize_v0_response(&request_data, &response, VisualisationFormat::JpegBytes)
                .unwrap();
        assert!(result.prediction.is_null());
        match result.visualisation {
            Some(Visualisation::Bytes(bytes)) => assert_eq!(bytes, vec![0xFF, 0xD8, 0xFF]),
            other => panic!("Expected raw bytes, got {other:?}"),
        }
    }

    #[test]
    fn test_single_input_unwraps_but_one_element_batch_does_not() {
        let response = InferenceResponse {
            prediction: Value::Null,
            visualisation: None,
        };
        assert!(InferenceOutput::from_parts(vec![response.clone()], true).is_single());
        assert!(!InferenceOutput::from_parts(vec![response], false).is_single());
    }

    #[test]
    fn test_combine_embeddings_splits_batched_responses() {
        let responses = vec![
            json!({"embeddings": [[0.1, 0.2], [0.3, 0.4]], "time": 0.01}),
            json!({"embeddings": [[0.5, 0.6]], "time": 0.02}),
        ];
        let combined = combine_embeddings(responses);
        assert_eq!(combined.len(), 3, "Each image gets its own entry");
        assert_eq!(combined[0]["embeddings"], json!([[0.1, 0.2]]));
        assert_eq!(combined[1]["embeddings"], json!([[0.3, 0.4]]));
        assert_eq!(combined[2]["embeddings"], json!([[0.5, 0.6]]));
        assert_eq!(combined[2]["time"], 0.02);
    }
}
