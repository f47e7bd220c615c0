//! HTTP client for inference servers.
//!
//! The entry point is [`InferenceHttpClient`]: construct it with a server
//! address and an API key, then call [`InferenceHttpClient::infer`] with one
//! image or an ordered batch. The client speaks two protocol generations,
//! selects one from the server address, and exposes scoped overrides for
//! configuration, protocol mode and model selection.

pub mod client;
pub mod entities;
pub mod errors;
pub mod executors;
pub mod loaders;
pub mod post_processing;
pub mod registry;
pub mod requests;

pub use client::{ConfigurationGuard, InferenceHttpClient, ModeGuard, ModelGuard};
pub use entities::{
    ClientMode, ClipArgument, ImageReference, InferenceConfiguration, InferenceInput, TextInput,
    Visualisation, VisualisationFormat, WorkflowInvocation,
};
pub use errors::{ClientError, Result};
pub use post_processing::{InferenceOutput, InferenceResponse};
pub use registry::{ModelDescription, RegisteredModels, ServerInfo};
