use crate::entities::{
    CLASSIFICATION_TASK, ClientMode, ClipArgument, INSTANCE_SEGMENTATION_TASK, ImageReference,
    InferenceConfiguration, InferenceInput, KEYPOINTS_DETECTION_TASK, OBJECT_DETECTION_TASK,
    TextInput, WorkflowInvocation,
};
use crate::errors::{ClientError, Result};
use crate::executors::{self, RequestMethod};
use crate::loaders;
use crate::post_processing::{
    self, InferenceOutput, InferenceResponse, normalize_v0_response, normalize_v1_response,
};
use crate::registry::{ModelDescription, RegisteredModels, ServerInfo};
use crate::requests::{
    ImagePlacement, RequestData, inject_images_into_payload, prepare_requests_data,
};
use serde_json::{Value, json};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// The multi-tenant hosted platform only speaks the v0 protocol.
const HOSTED_INFERENCE_DOMAIN: &str = "roboflow.com";

/// HTTP client for inference servers.
///
/// The facade owns the mutable session state: active configuration, active
/// client mode and the selected model. That state is meant for a single
/// writer; the scoped overrides ([`InferenceHttpClient::use_configuration`],
/// [`InferenceHttpClient::use_api_v0`], [`InferenceHttpClient::use_model`])
/// are not safe for concurrent mutation from multiple call sites. Network
/// dispatch, by contrast, runs many requests in parallel bounded by the
/// configured concurrency ceiling.
pub struct InferenceHttpClient {
    api_url: String,
    api_key: String,
    inference_configuration: InferenceConfiguration,
    client_mode: ClientMode,
    selected_model: Option<String>,
    http: reqwest::Client,
}

impl InferenceHttpClient {
    /// Build a client for the given server address. The client mode is
    /// resolved from the address: the hosted platform domain selects v0,
    /// anything else selects v1.
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let client_mode = determine_client_mode(&api_url);
        tracing::debug!(api_url = %api_url, mode = client_mode.as_str(), "Inference client created");
        Self {
            api_url,
            api_key: api_key.into(),
            inference_configuration: InferenceConfiguration::default(),
            client_mode,
            selected_model: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn inference_configuration(&self) -> &InferenceConfiguration {
        &self.inference_configuration
    }

    pub fn client_mode(&self) -> ClientMode {
        self.client_mode
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    /// Replace the active configuration. Always a full substitution.
    pub fn configure(&mut self, inference_configuration: InferenceConfiguration) -> &mut Self {
        self.inference_configuration = inference_configuration;
        self
    }

    pub fn select_api_v0(&mut self) -> &mut Self {
        self.client_mode = ClientMode::V0;
        self
    }

    pub fn select_api_v1(&mut self) -> &mut Self {
        self.client_mode = ClientMode::V1;
        self
    }

    pub fn select_model(&mut self, model_id: impl Into<String>) -> &mut Self {
        self.selected_model = Some(model_id.into());
        self
    }

    /// Swap the configuration for the guard's lifetime; the previous one is
    /// restored when the guard drops, on error exits included.
    pub fn use_configuration(
        &mut self,
        inference_configuration: InferenceConfiguration,
    ) -> ConfigurationGuard<'_> {
        let previous =
            std::mem::replace(&mut self.inference_configuration, inference_configuration);
        ConfigurationGuard {
            client: self,
            previous: Some(previous),
        }
    }

    /// Speak v0 for the guard's lifetime.
    pub fn use_api_v0(&mut self) -> ModeGuard<'_> {
        let previous = self.client_mode;
        self.client_mode = ClientMode::V0;
        ModeGuard {
            client: self,
            previous,
        }
    }

    /// Speak v1 for the guard's lifetime.
    pub fn use_api_v1(&mut self) -> ModeGuard<'_> {
        let previous = self.client_mode;
        self.client_mode = ClientMode::V1;
        ModeGuard {
            client: self,
            previous,
        }
    }

    /// Select a model for the guard's lifetime.
    pub fn use_model(&mut self, model_id: impl Into<String>) -> ModelGuard<'_> {
        let previous = self.selected_model.replace(model_id.into());
        ModelGuard {
            client: self,
            previous: Some(previous),
        }
    }

    pub fn get_server_info(&self) -> Result<ServerInfo> {
        let response = executors::execute_single(
            &self.bare_request(format!("{}/info", self.api_url)),
            RequestMethod::Get,
        )?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn get_server_info_async(&self) -> Result<ServerInfo> {
        let response = executors::execute_single_async(
            &self.http,
            &self.bare_request(format!("{}/info", self.api_url)),
            RequestMethod::Get,
        )
        .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Run inference on one image or an ordered batch, speaking whichever
    /// protocol generation is active.
    pub fn infer<I>(&self, input: I, model_id: Option<&str>) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        match self.client_mode {
            ClientMode::V0 => self.infer_from_api_v0(input.into(), model_id),
            ClientMode::V1 => self.infer_from_api_v1(input.into(), model_id),
        }
    }

    pub async fn infer_async<I>(&self, input: I, model_id: Option<&str>) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        match self.client_mode {
            ClientMode::V0 => self.infer_from_api_v0_async(input.into(), model_id).await,
            ClientMode::V1 => self.infer_from_api_v1_async(input.into(), model_id).await,
        }
    }

    /// Run inference over every image file in a directory matching the
    /// configured extensions, pairing each prediction with its path.
    pub fn infer_on_directory(
        &self,
        directory: &Path,
        model_id: Option<&str>,
    ) -> Result<Vec<(PathBuf, InferenceResponse)>> {
        let paths = loaders::scan_directory_for_images(
            directory,
            &self.inference_configuration.image_extensions_for_directory_scan,
        )?;
        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let output = self.infer(ImageReference::Path(path.clone()), model_id)?;
            for response in output.into_vec() {
                results.push((path.clone(), response));
            }
        }
        Ok(results)
    }

    fn infer_from_api_v0(
        &self,
        input: InferenceInput,
        model_id: Option<&str>,
    ) -> Result<InferenceOutput> {
        let plan = self.plan_v0_call(input, model_id)?;
        let encoded =
            loaders::load_static_inference_input(plan.references, plan.max_height, plan.max_width)?;
        let requests_data = self.package_v0_requests(plan.url, encoded);
        let responses = executors::execute_requests_packages(
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )?;
        self.collect_v0_results(&requests_data, &responses, plan.unwrap_single)
    }

    async fn infer_from_api_v0_async(
        &self,
        input: InferenceInput,
        model_id: Option<&str>,
    ) -> Result<InferenceOutput> {
        let plan = self.plan_v0_call(input, model_id)?;
        let encoded = loaders::load_static_inference_input_async(
            &self.http,
            plan.references,
            plan.max_height,
            plan.max_width,
        )
        .await?;
        let requests_data = self.package_v0_requests(plan.url, encoded);
        let responses = executors::execute_requests_packages_async(
            &self.http,
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )
        .await?;
        self.collect_v0_results(&requests_data, &responses, plan.unwrap_single)
    }

    fn infer_from_api_v1(
        &self,
        input: InferenceInput,
        model_id: Option<&str>,
    ) -> Result<InferenceOutput> {
        self.ensure_v1_client_mode()?;
        let model_id = self.resolve_model_id(model_id)?;
        let description = self.describe_or_load(&model_id, true)?;
        let endpoint = v1_inference_endpoint(&description.task_type)
            .ok_or_else(|| ClientError::TaskTypeNotSupported(description.task_type.clone()))?;
        let (max_height, max_width) =
            determine_downsizing_parameters(&self.inference_configuration, Some(&description));
        let (references, unwrap_single) = input.into_parts();
        let encoded = loaders::load_static_inference_input(references, max_height, max_width)?;
        let requests_data = prepare_requests_data(
            format!("{}{endpoint}", self.api_url),
            encoded,
            Vec::new(),
            Some(self.v1_inference_payload(&model_id, &description.task_type)),
            self.inference_configuration.max_batch_size,
            ImagePlacement::Json,
        );
        let responses = executors::execute_requests_packages(
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )?;
        self.collect_v1_results(&requests_data, &responses, unwrap_single)
    }

    async fn infer_from_api_v1_async(
        &self,
        input: InferenceInput,
        model_id: Option<&str>,
    ) -> Result<InferenceOutput> {
        self.ensure_v1_client_mode()?;
        let model_id = self.resolve_model_id(model_id)?;
        let description = self.describe_or_load_async(&model_id, true).await?;
        let endpoint = v1_inference_endpoint(&description.task_type)
            .ok_or_else(|| ClientError::TaskTypeNotSupported(description.task_type.clone()))?;
        let (max_height, max_width) =
            determine_downsizing_parameters(&self.inference_configuration, Some(&description));
        let (references, unwrap_single) = input.into_parts();
        let encoded =
            loaders::load_static_inference_input_async(&self.http, references, max_height, max_width)
                .await?;
        let requests_data = prepare_requests_data(
            format!("{}{endpoint}", self.api_url),
            encoded,
            Vec::new(),
            Some(self.v1_inference_payload(&model_id, &description.task_type)),
            self.inference_configuration.max_batch_size,
            ImagePlacement::Json,
        );
        let responses = executors::execute_requests_packages_async(
            &self.http,
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )
        .await?;
        self.collect_v1_results(&requests_data, &responses, unwrap_single)
    }

    /// Resolve a model description, loading the model server-side at most
    /// once if it is absent from the registry.
    pub fn get_model_description(&self, model_id: &str) -> Result<ModelDescription> {
        self.describe_or_load(model_id, true)
    }

    pub async fn get_model_description_async(&self, model_id: &str) -> Result<ModelDescription> {
        self.describe_or_load_async(model_id, true).await
    }

    fn describe_or_load(&self, model_id: &str, allow_loading: bool) -> Result<ModelDescription> {
        self.ensure_v1_client_mode()?;
        let registered = self.list_loaded_models()?;
        if let Some(description) = registered.find(model_id) {
            return Ok(description.clone());
        }
        if allow_loading {
            // Exactly one load attempt: the recheck runs with loading
            // disallowed, so a backend that accepts the load without
            // registering the model cannot trap us in a loop.
            self.load_model_request(model_id)?;
            return self.describe_or_load(model_id, false);
        }
        Err(ClientError::ModelNotInitialized(model_id.to_string()))
    }

    async fn describe_or_load_async(
        &self,
        model_id: &str,
        allow_loading: bool,
    ) -> Result<ModelDescription> {
        self.ensure_v1_client_mode()?;
        let registered = self.list_loaded_models_async().await?;
        if let Some(description) = registered.find(model_id) {
            return Ok(description.clone());
        }
        if allow_loading {
            self.load_model_request_async(model_id).await?;
            let registered = self.list_loaded_models_async().await?;
            if let Some(description) = registered.find(model_id) {
                return Ok(description.clone());
            }
        }
        Err(ClientError::ModelNotInitialized(model_id.to_string()))
    }

    pub fn list_loaded_models(&self) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single(
            &self.bare_request(format!("{}/model/registry", self.api_url)),
            RequestMethod::Get,
        )?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn list_loaded_models_async(&self) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single_async(
            &self.http,
            &self.bare_request(format!("{}/model/registry", self.api_url)),
            RequestMethod::Get,
        )
        .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Load a model server-side, optionally making it this client's default.
    pub fn load_model(
        &mut self,
        model_id: &str,
        set_as_default: bool,
    ) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let registered = self.load_model_request(model_id)?;
        if set_as_default {
            self.selected_model = Some(model_id.to_string());
        }
        Ok(registered)
    }

    pub async fn load_model_async(
        &mut self,
        model_id: &str,
        set_as_default: bool,
    ) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let registered = self.load_model_request_async(model_id).await?;
        if set_as_default {
            self.selected_model = Some(model_id.to_string());
        }
        Ok(registered)
    }

    /// Unload one model. Clears the selection when it matches the unloaded
    /// model.
    pub fn unload_model(&mut self, model_id: &str) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single(
            &self.payload_request(
                format!("{}/model/remove", self.api_url),
                json!({"model_id": model_id}),
            ),
            RequestMethod::Post,
        )?;
        self.clear_selection_if_matches(model_id);
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn unload_model_async(&mut self, model_id: &str) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single_async(
            &self.http,
            &self.payload_request(
                format!("{}/model/remove", self.api_url),
                json!({"model_id": model_id}),
            ),
            RequestMethod::Post,
        )
        .await?;
        self.clear_selection_if_matches(model_id);
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Unload every model. Always clears the selection.
    pub fn unload_all_models(&mut self) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single(
            &self.bare_request(format!("{}/model/clear", self.api_url)),
            RequestMethod::Post,
        )?;
        self.selected_model = None;
        Ok(serde_json::from_slice(&response.body)?)
    }

    pub async fn unload_all_models_async(&mut self) -> Result<RegisteredModels> {
        self.ensure_v1_client_mode()?;
        let response = executors::execute_single_async(
            &self.http,
            &self.bare_request(format!("{}/model/clear", self.api_url)),
            RequestMethod::Post,
        )
        .await?;
        self.selected_model = None;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Run OCR over the input images, one request per image.
    pub fn ocr_image<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        let (references, unwrap_single) = input.into().into_parts();
        let encoded = loaders::load_static_inference_input(references, None, None)?;
        let requests_data = prepare_requests_data(
            self.wrap_url_with_api_key(format!("{}/doctr/ocr", self.api_url)),
            encoded,
            Vec::new(),
            Some(self.initialise_payload()),
            1,
            ImagePlacement::Json,
        );
        let responses = executors::execute_requests_packages(
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )?;
        let values = responses
            .iter()
            .map(|response| response.json())
            .collect::<Result<Vec<_>>>()?;
        Ok(InferenceOutput::from_parts(
            values_to_responses(values),
            unwrap_single,
        ))
    }

    pub async fn ocr_image_async<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        let (values, unwrap_single) = self
            .post_images_async(input.into(), "/doctr/ocr", 1)
            .await?;
        Ok(InferenceOutput::from_parts(
            values_to_responses(values),
            unwrap_single,
        ))
    }

    /// Gaze detection. Only served by the v1 protocol.
    pub fn detect_gazes<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        self.ensure_v1_client_mode()?;
        let (values, unwrap_single) = self.post_images(
            input.into(),
            "/gaze/gaze_detection",
            self.inference_configuration.max_batch_size,
        )?;
        let combined = post_processing::combine_gaze_detections(values);
        Ok(InferenceOutput::from_parts(
            values_to_responses(combined),
            unwrap_single,
        ))
    }

    pub async fn detect_gazes_async<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        self.ensure_v1_client_mode()?;
        let (values, unwrap_single) = self
            .post_images_async(
                input.into(),
                "/gaze/gaze_detection",
                self.inference_configuration.max_batch_size,
            )
            .await?;
        let combined = post_processing::combine_gaze_detections(values);
        Ok(InferenceOutput::from_parts(
            values_to_responses(combined),
            unwrap_single,
        ))
    }

    /// Embed images, splitting batched responses back into one entry per
    /// image.
    pub fn get_clip_image_embeddings<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        let (values, unwrap_single) = self.post_images(
            input.into(),
            "/clip/embed_image",
            self.inference_configuration.max_batch_size,
        )?;
        let combined = post_processing::combine_embeddings(values);
        Ok(InferenceOutput::from_parts(
            values_to_responses(combined),
            unwrap_single,
        ))
    }

    pub async fn get_clip_image_embeddings_async<I>(&self, input: I) -> Result<InferenceOutput>
    where
        I: Into<InferenceInput>,
    {
        let (values, unwrap_single) = self
            .post_images_async(
                input.into(),
                "/clip/embed_image",
                self.inference_configuration.max_batch_size,
            )
            .await?;
        let combined = post_processing::combine_embeddings(values);
        Ok(InferenceOutput::from_parts(
            values_to_responses(combined),
            unwrap_single,
        ))
    }

    pub fn get_clip_text_embeddings(&self, text: impl Into<TextInput>) -> Result<Value> {
        let mut payload = self.initialise_payload();
        if let Some(object) = payload.as_object_mut() {
            object.insert("text".to_string(), text.into().into_value());
        }
        let response = executors::execute_single(
            &self.payload_request(
                self.wrap_url_with_api_key(format!("{}/clip/embed_text", self.api_url)),
                payload,
            ),
            RequestMethod::Post,
        )?;
        response.json()
    }

    pub async fn get_clip_text_embeddings_async(
        &self,
        text: impl Into<TextInput>,
    ) -> Result<Value> {
        let mut payload = self.initialise_payload();
        if let Some(object) = payload.as_object_mut() {
            object.insert("text".to_string(), text.into().into_value());
        }
        let response = executors::execute_single_async(
            &self.http,
            &self.payload_request(
                self.wrap_url_with_api_key(format!("{}/clip/embed_text", self.api_url)),
                payload,
            ),
            RequestMethod::Post,
        )
        .await?;
        response.json()
    }

    /// Compare a subject against a prompt, each being text or images.
    pub fn clip_compare(&self, subject: ClipArgument, prompt: ClipArgument) -> Result<Value> {
        let payload = self.clip_compare_payload(subject, prompt)?;
        let response = executors::execute_single(
            &self.payload_request(
                self.wrap_url_with_api_key(format!("{}/clip/compare", self.api_url)),
                payload,
            ),
            RequestMethod::Post,
        )?;
        response.json()
    }

    pub async fn clip_compare_async(
        &self,
        subject: ClipArgument,
        prompt: ClipArgument,
    ) -> Result<Value> {
        let payload = self.clip_compare_payload(subject, prompt)?;
        let response = executors::execute_single_async(
            &self.http,
            &self.payload_request(
                self.wrap_url_with_api_key(format!("{}/clip/compare", self.api_url)),
                payload,
            ),
            RequestMethod::Post,
        )
        .await?;
        response.json()
    }

    /// Prompt the vision-language model with one image and a text prompt.
    /// Only served by the v1 protocol.
    pub fn prompt_cogvlm(
        &self,
        visual_prompt: ImageReference,
        text_prompt: &str,
        chat_history: Option<&[(String, String)]>,
    ) -> Result<Value> {
        self.ensure_v1_client_mode()?;
        let encoded = loaders::load_static_inference_input(vec![visual_prompt], None, None)?;
        let mut payload = json!({
            "api_key": self.api_key,
            "model_id": "cogvlm",
            "prompt": text_prompt,
        });
        inject_images_into_payload(&mut payload, &encoded, "image");
        if let Some(history) = chat_history {
            if let Some(object) = payload.as_object_mut() {
                object.insert("history".to_string(), json!(history));
            }
        }
        let response = executors::execute_single(
            &self.payload_request(format!("{}/llm/cogvlm", self.api_url), payload),
            RequestMethod::Post,
        )?;
        response.json()
    }

    /// Execute a workflow server-side and return its outputs.
    pub fn infer_from_workflow(&self, invocation: WorkflowInvocation) -> Result<Value> {
        let named_workflow =
            invocation.workspace_name.is_some() && invocation.workflow_name.is_some();
        if named_workflow == invocation.specification.is_some() {
            return Err(ClientError::InvalidParameter(
                "either both `workspace_name` and `workflow_name` or an inline `specification` \
                 must be given, never both"
                    .to_string(),
            ));
        }
        let url = match (&invocation.workspace_name, &invocation.workflow_name) {
            (Some(workspace_name), Some(workflow_name)) => format!(
                "{}/infer/workflows/{workspace_name}/{workflow_name}",
                self.api_url
            ),
            _ => format!("{}/infer/workflows", self.api_url),
        };
        let mut runtime_parameters = serde_json::Map::new();
        for (image_name, reference) in invocation.images {
            let encoded = loaders::load_static_inference_input(vec![reference], None, None)?;
            let mut holder = Value::Object(serde_json::Map::new());
            inject_images_into_payload(&mut holder, &encoded, &image_name);
            if let Some(object) = holder.as_object_mut() {
                if let Some(value) = object.remove(&image_name) {
                    runtime_parameters.insert(image_name, value);
                }
            }
        }
        runtime_parameters.extend(invocation.parameters);
        let mut payload = json!({
            "api_key": self.api_key,
            "runtime_parameters": Value::Object(runtime_parameters),
        });
        if let Some(object) = payload.as_object_mut() {
            if let Some(excluded_fields) = invocation.excluded_fields {
                object.insert("excluded_fields".to_string(), excluded_fields.into());
            }
            if let Some(specification) = invocation.specification {
                object.insert("specification".to_string(), specification);
            }
        }
        let response = executors::execute_single(
            &self.payload_request(url, payload),
            RequestMethod::Post,
        )?;
        let mut parsed = response.json()?;
        match parsed.get_mut("outputs") {
            Some(outputs) => Ok(outputs.take()),
            None => Ok(parsed),
        }
    }

    fn post_images(
        &self,
        input: InferenceInput,
        endpoint: &str,
        max_batch_size: usize,
    ) -> Result<(Vec<Value>, bool)> {
        let (references, unwrap_single) = input.into_parts();
        let encoded = loaders::load_static_inference_input(references, None, None)?;
        let requests_data = prepare_requests_data(
            self.wrap_url_with_api_key(format!("{}{endpoint}", self.api_url)),
            encoded,
            Vec::new(),
            Some(self.initialise_payload()),
            max_batch_size,
            ImagePlacement::Json,
        );
        let responses = executors::execute_requests_packages(
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )?;
        let values = responses
            .iter()
            .map(|response| response.json())
            .collect::<Result<Vec<_>>>()?;
        Ok((values, unwrap_single))
    }

    async fn post_images_async(
        &self,
        input: InferenceInput,
        endpoint: &str,
        max_batch_size: usize,
    ) -> Result<(Vec<Value>, bool)> {
        let (references, unwrap_single) = input.into_parts();
        let encoded =
            loaders::load_static_inference_input_async(&self.http, references, None, None).await?;
        let requests_data = prepare_requests_data(
            self.wrap_url_with_api_key(format!("{}{endpoint}", self.api_url)),
            encoded,
            Vec::new(),
            Some(self.initialise_payload()),
            max_batch_size,
            ImagePlacement::Json,
        );
        let responses = executors::execute_requests_packages_async(
            &self.http,
            &requests_data,
            RequestMethod::Post,
            self.inference_configuration.max_concurrent_requests,
        )
        .await?;
        let values = responses
            .iter()
            .map(|response| response.json())
            .collect::<Result<Vec<_>>>()?;
        Ok((values, unwrap_single))
    }

    fn v0_call_parameters(&self) -> Vec<(String, String)> {
        let mut parameters = vec![("api_key".to_string(), self.api_key.clone())];
        parameters.extend(self.inference_configuration.to_legacy_call_parameters());
        parameters
    }

    /// Everything about a v0 call that is decided before any image is
    /// loaded. Shared by the blocking and async paths, which differ only in
    /// how they load and dispatch.
    fn plan_v0_call(&self, input: InferenceInput, model_id: Option<&str>) -> Result<V0CallPlan> {
        let model_id = self.resolve_model_id(model_id)?;
        let (project, version) = parse_model_identifier(&model_id)?;
        let url = format!("{}/{project}/{version}", self.api_url);
        let (max_height, max_width) =
            determine_downsizing_parameters(&self.inference_configuration, None);
        let (references, unwrap_single) = input.into_parts();
        Ok(V0CallPlan {
            url,
            max_height,
            max_width,
            references,
            unwrap_single,
        })
    }

    fn package_v0_requests(
        &self,
        url: String,
        encoded: Vec<loaders::EncodedImage>,
    ) -> Vec<RequestData> {
        prepare_requests_data(
            url,
            encoded,
            self.v0_call_parameters(),
            None,
            1,
            ImagePlacement::Data,
        )
    }

    fn collect_v0_results(
        &self,
        requests_data: &[RequestData],
        responses: &[executors::ApiResponse],
        unwrap_single: bool,
    ) -> Result<InferenceOutput> {
        let format = self.inference_configuration.output_visualisation_format;
        let mut results = Vec::with_capacity(responses.len());
        for (request_data, response) in requests_data.iter().zip(responses) {
            results.push(normalize_v0_response(request_data, response, format)?);
        }
        Ok(InferenceOutput::from_parts(results, unwrap_single))
    }

    fn collect_v1_results(
        &self,
        requests_data: &[RequestData],
        responses: &[executors::ApiResponse],
        unwrap_single: bool,
    ) -> Result<InferenceOutput> {
        let format = self.inference_configuration.output_visualisation_format;
        let mut results = Vec::new();
        for (request_data, response) in requests_data.iter().zip(responses) {
            results.extend(normalize_v1_response(request_data, response, format)?);
        }
        Ok(InferenceOutput::from_parts(results, unwrap_single))
    }

    fn v1_inference_payload(&self, model_id: &str, task_type: &str) -> Value {
        let mut payload = json!({
            "api_key": self.api_key,
            "model_id": model_id,
        });
        if let Some(object) = payload.as_object_mut() {
            object.extend(self.inference_configuration.to_api_call_parameters(task_type));
        }
        payload
    }

    fn clip_compare_payload(
        &self,
        subject: ClipArgument,
        prompt: ClipArgument,
    ) -> Result<Value> {
        let mut payload = self.initialise_payload();
        if let Some(object) = payload.as_object_mut() {
            object.insert("subject_type".to_string(), subject.type_name().into());
            object.insert("prompt_type".to_string(), prompt.type_name().into());
        }
        self.insert_clip_argument(&mut payload, "subject", subject)?;
        self.insert_clip_argument(&mut payload, "prompt", prompt)?;
        Ok(payload)
    }

    fn insert_clip_argument(
        &self,
        payload: &mut Value,
        key: &str,
        argument: ClipArgument,
    ) -> Result<()> {
        match argument {
            ClipArgument::Text(text) => {
                if let Some(object) = payload.as_object_mut() {
                    object.insert(key.to_string(), text.into());
                }
            }
            ClipArgument::Texts(texts) => {
                if let Some(object) = payload.as_object_mut() {
                    object.insert(key.to_string(), texts.into());
                }
            }
            ClipArgument::Image(reference) => {
                let encoded = loaders::load_static_inference_input(vec![reference], None, None)?;
                inject_images_into_payload(payload, &encoded, key);
            }
            ClipArgument::Images(references) => {
                let encoded = loaders::load_static_inference_input(references, None, None)?;
                inject_images_into_payload(payload, &encoded, key);
            }
        }
        Ok(())
    }

    fn load_model_request(&self, model_id: &str) -> Result<RegisteredModels> {
        let response = executors::execute_single(
            &self.payload_request(
                format!("{}/model/add", self.api_url),
                json!({"model_id": model_id, "api_key": self.api_key}),
            ),
            RequestMethod::Post,
        )?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn load_model_request_async(&self, model_id: &str) -> Result<RegisteredModels> {
        let response = executors::execute_single_async(
            &self.http,
            &self.payload_request(
                format!("{}/model/add", self.api_url),
                json!({"model_id": model_id, "api_key": self.api_key}),
            ),
            RequestMethod::Post,
        )
        .await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn clear_selection_if_matches(&mut self, model_id: &str) {
        if self.selected_model.as_deref() == Some(model_id) {
            self.selected_model = None;
        }
    }

    fn bare_request(&self, url: String) -> RequestData {
        RequestData {
            url,
            parameters: Vec::new(),
            payload: None,
            body: None,
            image_scaling_factors: Vec::new(),
        }
    }

    fn payload_request(&self, url: String, payload: Value) -> RequestData {
        RequestData {
            url,
            parameters: Vec::new(),
            payload: Some(payload),
            body: None,
            image_scaling_factors: Vec::new(),
        }
    }

    fn initialise_payload(&self) -> Value {
        if self.client_mode == ClientMode::V0 {
            json!({})
        } else {
            json!({"api_key": self.api_key})
        }
    }

    fn wrap_url_with_api_key(&self, url: String) -> String {
        if self.client_mode == ClientMode::V0 {
            format!("{url}?api_key={}", self.api_key)
        } else {
            url
        }
    }

    fn ensure_v1_client_mode(&self) -> Result<()> {
        if self.client_mode != ClientMode::V1 {
            return Err(ClientError::WrongClientMode { required: "v1" });
        }
        Ok(())
    }

    fn resolve_model_id(&self, model_id: Option<&str>) -> Result<String> {
        model_id
            .map(str::to_string)
            .or_else(|| self.selected_model.clone())
            .ok_or(ClientError::ModelNotSelected)
    }
}

struct V0CallPlan {
    url: String,
    max_height: Option<u32>,
    max_width: Option<u32>,
    references: Vec<ImageReference>,
    unwrap_single: bool,
}

fn values_to_responses(values: Vec<Value>) -> Vec<InferenceResponse> {
    values
        .into_iter()
        .map(|prediction| InferenceResponse {
            prediction,
            visualisation: None,
        })
        .collect()
}

fn v1_inference_endpoint(task_type: &str) -> Option<&'static str> {
    match task_type {
        CLASSIFICATION_TASK => Some("/infer/classification"),
        OBJECT_DETECTION_TASK => Some("/infer/object_detection"),
        INSTANCE_SEGMENTATION_TASK => Some("/infer/instance_segmentation"),
        KEYPOINTS_DETECTION_TASK => Some("/infer/keypoints_detection"),
        _ => None,
    }
}

fn determine_client_mode(api_url: &str) -> ClientMode {
    if api_url.contains(HOSTED_INFERENCE_DOMAIN) {
        ClientMode::V0
    } else {
        ClientMode::V1
    }
}

fn parse_model_identifier(model_id: &str) -> Result<(&str, &str)> {
    let mut chunks = model_id.split('/');
    match (chunks.next(), chunks.next(), chunks.next()) {
        (Some(project), Some(version), None) if !project.is_empty() && !version.is_empty() => {
            Ok((project, version))
        }
        _ => Err(ClientError::InvalidModelIdentifier(model_id.to_string())),
    }
}

fn determine_downsizing_parameters(
    configuration: &InferenceConfiguration,
    model_description: Option<&ModelDescription>,
) -> (Option<u32>, Option<u32>) {
    if configuration.client_downsizing_disabled {
        return (None, None);
    }
    if let Some(description) = model_description {
        if let (Some(input_height), Some(input_width)) =
            (description.input_height, description.input_width)
        {
            return (Some(input_height), Some(input_width));
        }
    }
    (
        Some(configuration.default_max_input_size),
        Some(configuration.default_max_input_size),
    )
}

/// Restores the previous configuration when dropped.
pub struct ConfigurationGuard<'a> {
    client: &'a mut InferenceHttpClient,
    previous: Option<InferenceConfiguration>,
}

impl Deref for ConfigurationGuard<'_> {
    type Target = InferenceHttpClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl DerefMut for ConfigurationGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
    }
}

impl Drop for ConfigurationGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.client.inference_configuration = previous;
        }
    }
}

/// Restores the previous client mode when dropped.
pub struct ModeGuard<'a> {
    client: &'a mut InferenceHttpClient,
    previous: ClientMode,
}

impl Deref for ModeGuard<'_> {
    type Target = InferenceHttpClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl DerefMut for ModeGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
    }
}

impl Drop for ModeGuard<'_> {
    fn drop(&mut self) {
        self.client.client_mode = self.previous;
    }
}

/// Restores the previously selected model when dropped.
pub struct ModelGuard<'a> {
    client: &'a mut InferenceHttpClient,
    previous: Option<Option<String>>,
}

impl Deref for ModelGuard<'_> {
    type Target = InferenceHttpClient;

    fn deref(&self) -> &Self::Target {
        self.client
    }
}

impl DerefMut for ModelGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client
    }
}

impl Drop for ModelGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.client.selected_model = previous;
        }
    }
}
