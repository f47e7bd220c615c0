use image::DynamicImage;
use serde_json::{Map, Value};
use std::path::PathBuf;

pub const CLASSIFICATION_TASK: &str = "classification";
pub const OBJECT_DETECTION_TASK: &str = "object-detection";
pub const INSTANCE_SEGMENTATION_TASK: &str = "instance-segmentation";
pub const KEYPOINTS_DETECTION_TASK: &str = "keypoints-detection";

/// Which generation of the backend HTTP API the client speaks.
///
/// The two generations are mutually incompatible: `V0` places one image per
/// request with parameters in the query string, `V1` batches images inside a
/// JSON payload and exposes the model registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    V0,
    V1,
}

impl ClientMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMode::V0 => "v0",
            ClientMode::V1 => "v1",
        }
    }
}

/// A reference to an image to run inference on.
///
/// The client does not interpret the variants itself; the input loader turns
/// each of them into an encoded payload plus a scaling factor.
#[derive(Debug, Clone)]
pub enum ImageReference {
    /// Path to an image file on the local filesystem.
    Path(PathBuf),
    /// URL of an image to be fetched over HTTP.
    Url(String),
    /// Already base64-encoded image bytes.
    Base64(String),
    /// Encoded image bytes (e.g. the content of a JPEG or PNG file).
    EncodedBytes(Vec<u8>),
    /// A decoded in-memory image.
    Image(DynamicImage),
}

impl From<PathBuf> for ImageReference {
    fn from(path: PathBuf) -> Self {
        ImageReference::Path(path)
    }
}

impl From<DynamicImage> for ImageReference {
    fn from(image: DynamicImage) -> Self {
        ImageReference::Image(image)
    }
}

impl From<Vec<u8>> for ImageReference {
    fn from(bytes: Vec<u8>) -> Self {
        ImageReference::EncodedBytes(bytes)
    }
}

/// One image or an ordered batch of images handed to an inference call.
///
/// The distinction is preserved through the whole call chain: a `Single`
/// input produces a bare result, a `Batch` input always produces a list,
/// even when it holds one element.
#[derive(Debug, Clone)]
pub enum InferenceInput {
    Single(ImageReference),
    Batch(Vec<ImageReference>),
}

impl InferenceInput {
    /// Split into the ordered list of references and a flag telling whether
    /// the final result must be unwrapped from a one-element list.
    pub(crate) fn into_parts(self) -> (Vec<ImageReference>, bool) {
        match self {
            InferenceInput::Single(reference) => (vec![reference], true),
            InferenceInput::Batch(references) => (references, false),
        }
    }
}

impl From<ImageReference> for InferenceInput {
    fn from(reference: ImageReference) -> Self {
        InferenceInput::Single(reference)
    }
}

impl From<Vec<ImageReference>> for InferenceInput {
    fn from(references: Vec<ImageReference>) -> Self {
        InferenceInput::Batch(references)
    }
}

impl From<PathBuf> for InferenceInput {
    fn from(path: PathBuf) -> Self {
        InferenceInput::Single(ImageReference::Path(path))
    }
}

impl From<DynamicImage> for InferenceInput {
    fn from(image: DynamicImage) -> Self {
        InferenceInput::Single(ImageReference::Image(image))
    }
}

/// One or several text snippets for text embedding calls.
#[derive(Debug, Clone)]
pub enum TextInput {
    Single(String),
    Batch(Vec<String>),
}

impl TextInput {
    pub(crate) fn into_value(self) -> Value {
        match self {
            TextInput::Single(text) => Value::String(text),
            TextInput::Batch(texts) => texts.into(),
        }
    }
}

impl From<&str> for TextInput {
    fn from(text: &str) -> Self {
        TextInput::Single(text.to_string())
    }
}

impl From<Vec<String>> for TextInput {
    fn from(texts: Vec<String>) -> Self {
        TextInput::Batch(texts)
    }
}

/// Subject or prompt of a similarity comparison: either text or images.
#[derive(Debug, Clone)]
pub enum ClipArgument {
    Text(String),
    Texts(Vec<String>),
    Image(ImageReference),
    Images(Vec<ImageReference>),
}

impl ClipArgument {
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            ClipArgument::Text(_) | ClipArgument::Texts(_) => "text",
            ClipArgument::Image(_) | ClipArgument::Images(_) => "image",
        }
    }
}

/// Inputs of a server-side workflow execution.
///
/// Either `workspace_name` + `workflow_name` (definition fetched server-side)
/// or an inline `specification` must be set, never both.
#[derive(Debug, Clone, Default)]
pub struct WorkflowInvocation {
    pub workspace_name: Option<String>,
    pub workflow_name: Option<String>,
    pub specification: Option<Value>,
    pub images: Vec<(String, ImageReference)>,
    pub parameters: Map<String, Value>,
    pub excluded_fields: Option<Vec<String>>,
}

/// Output representation for prediction visualisations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualisationFormat {
    /// Keep the base64 string exactly as the server sent it.
    Base64,
    /// Decode to raw JPEG bytes.
    JpegBytes,
    /// Decode all the way to an in-memory image.
    Image,
}

/// A decoded prediction visualisation in the configured representation.
#[derive(Debug, Clone)]
pub enum Visualisation {
    Base64(String),
    Bytes(Vec<u8>),
    Image(DynamicImage),
}

/// Immutable snapshot of client tunables.
///
/// Replacing the active configuration on the client is always a full
/// substitution; there is no partial mutation.
#[derive(Debug, Clone)]
pub struct InferenceConfiguration {
    pub confidence_threshold: Option<f64>,
    pub keypoint_confidence_threshold: Option<f64>,
    pub iou_threshold: Option<f64>,
    pub max_candidates: Option<u32>,
    pub max_detections: Option<u32>,
    pub class_filter: Option<Vec<String>>,
    pub class_agnostic_nms: Option<bool>,
    pub visualize_predictions: bool,
    pub visualization_labels: Option<bool>,
    pub visualization_stroke_width: Option<u32>,
    pub output_visualisation_format: VisualisationFormat,
    pub image_extensions_for_directory_scan: Vec<String>,
    pub client_downsizing_disabled: bool,
    pub default_max_input_size: u32,
    pub max_concurrent_requests: usize,
    pub max_batch_size: usize,
}

impl Default for InferenceConfiguration {
    fn default() -> Self {
        Self {
            confidence_threshold: None,
            keypoint_confidence_threshold: None,
            iou_threshold: None,
            max_candidates: None,
            max_detections: None,
            class_filter: None,
            class_agnostic_nms: None,
            visualize_predictions: false,
            visualization_labels: None,
            visualization_stroke_width: None,
            output_visualisation_format: VisualisationFormat::Base64,
            image_extensions_for_directory_scan: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
            ],
            client_downsizing_disabled: false,
            default_max_input_size: 1024,
            max_concurrent_requests: 1,
            max_batch_size: 1,
        }
    }
}

impl InferenceConfiguration {
    /// Project the configuration onto the v0 query-string parameters.
    pub fn to_legacy_call_parameters(&self) -> Vec<(String, String)> {
        let mut parameters = Vec::new();
        if let Some(confidence) = self.confidence_threshold {
            parameters.push(("confidence".to_string(), confidence.to_string()));
        }
        if let Some(overlap) = self.iou_threshold {
            parameters.push(("overlap".to_string(), overlap.to_string()));
        }
        if let Some(max_detections) = self.max_detections {
            parameters.push(("max_detections".to_string(), max_detections.to_string()));
        }
        if let Some(stroke) = self.visualization_stroke_width {
            parameters.push(("stroke".to_string(), stroke.to_string()));
        }
        if let Some(labels) = self.visualization_labels {
            parameters.push(("labels".to_string(), labels.to_string()));
        }
        let format = if self.visualize_predictions {
            "image"
        } else {
            "json"
        };
        parameters.push(("format".to_string(), format.to_string()));
        parameters
    }

    /// Project the configuration onto the v1 JSON payload fields relevant
    /// for the given task type.
    pub fn to_api_call_parameters(&self, task_type: &str) -> Map<String, Value> {
        let mut payload = Map::new();
        if let Some(confidence) = self.confidence_threshold {
            payload.insert("confidence".to_string(), confidence.into());
        }
        if self.visualize_predictions {
            payload.insert("visualize_predictions".to_string(), true.into());
            if let Some(labels) = self.visualization_labels {
                payload.insert("visualization_labels".to_string(), labels.into());
            }
            if let Some(stroke) = self.visualization_stroke_width {
                payload.insert("visualization_stroke_width".to_string(), stroke.into());
            }
        }
        if matches!(
            task_type,
            OBJECT_DETECTION_TASK | INSTANCE_SEGMENTATION_TASK | KEYPOINTS_DETECTION_TASK
        ) {
            if let Some(iou_threshold) = self.iou_threshold {
                payload.insert("iou_threshold".to_string(), iou_threshold.into());
            }
            if let Some(max_candidates) = self.max_candidates {
                payload.insert("max_candidates".to_string(), max_candidates.into());
            }
            if let Some(max_detections) = self.max_detections {
                payload.insert("max_detections".to_string(), max_detections.into());
            }
            if let Some(class_filter) = &self.class_filter {
                payload.insert("class_filter".to_string(), class_filter.clone().into());
            }
            if let Some(class_agnostic_nms) = self.class_agnostic_nms {
                payload.insert("class_agnostic_nms".to_string(), class_agnostic_nms.into());
            }
        }
        if task_type == KEYPOINTS_DETECTION_TASK {
            if let Some(keypoint_confidence) = self.keypoint_confidence_threshold {
                payload.insert("keypoint_confidence".to_string(), keypoint_confidence.into());
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_mode_as_str() {
        assert_eq!(ClientMode::V0.as_str(), "v0");
        assert_eq!(ClientMode::V1.as_str(), "v1");
    }

    #[test]
    fn test_legacy_parameters_request_json_by_default() {
        let configuration = InferenceConfiguration::default();
        let parameters = configuration.to_legacy_call_parameters();
        assert!(
            parameters.contains(&("format".to_string(), "json".to_string())),
            "Default configuration should request JSON responses"
        );
        assert_eq!(
            parameters.len(),
            1,
            "Unset tunables should not be projected into query parameters"
        );
    }

    #[test]
    fn test_legacy_parameters_request_image_when_visualizing() {
        let configuration = InferenceConfiguration {
            visualize_predictions: true,
            confidence_threshold: Some(0.4),
            iou_threshold: Some(0.3),
            ..Default::default()
        };
        let parameters = configuration.to_legacy_call_parameters();
        assert!(parameters.contains(&("format".to_string(), "image".to_string())));
        assert!(parameters.contains(&("confidence".to_string(), "0.4".to_string())));
        assert!(parameters.contains(&("overlap".to_string(), "0.3".to_string())));
    }

    #[test]
    fn test_api_call_parameters_are_gated_by_task_type() {
        let configuration = InferenceConfiguration {
            confidence_threshold: Some(0.5),
            iou_threshold: Some(0.7),
            keypoint_confidence_threshold: Some(0.6),
            ..Default::default()
        };

        let classification = configuration.to_api_call_parameters(CLASSIFICATION_TASK);
        assert!(classification.contains_key("confidence"));
        assert!(
            !classification.contains_key("iou_threshold"),
            "NMS options make no sense for classification and must not be sent"
        );

        let detection = configuration.to_api_call_parameters(OBJECT_DETECTION_TASK);
        assert!(detection.contains_key("iou_threshold"));
        assert!(
            !detection.contains_key("keypoint_confidence"),
            "Keypoint confidence only applies to the keypoints task"
        );

        let keypoints = configuration.to_api_call_parameters(KEYPOINTS_DETECTION_TASK);
        assert!(keypoints.contains_key("keypoint_confidence"));
    }

    #[test]
    fn test_single_input_unwraps_final_result() {
        let (references, unwrap) =
            InferenceInput::Single(ImageReference::Base64("aGVsbG8=".to_string())).into_parts();
        assert_eq!(references.len(), 1);
        assert!(unwrap, "Single input must be unwrapped at the end");

        let (references, unwrap) =
            InferenceInput::Batch(vec![ImageReference::Base64("aGVsbG8=".to_string())])
                .into_parts();
        assert_eq!(references.len(), 1);
        assert!(
            !unwrap,
            "A one-element batch stays a list through the whole call chain"
        );
    }
}
