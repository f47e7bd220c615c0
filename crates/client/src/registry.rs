use serde::Deserialize;

/// Server-side description of one loaded model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelDescription {
    pub model_id: String,
    pub task_type: String,
    #[serde(default)]
    pub input_height: Option<u32>,
    #[serde(default)]
    pub input_width: Option<u32>,
}

/// The set of models currently loaded on the server, as reported by the
/// registry endpoint. Never cached client-side; every lookup re-fetches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredModels {
    #[serde(default)]
    pub models: Vec<ModelDescription>,
}

impl RegisteredModels {
    pub fn find(&self, model_id: &str) -> Option<&ModelDescription> {
        self.models.iter().find(|model| model.model_id == model_id)
    }
}

/// Basic metadata exposed by the server's info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}
