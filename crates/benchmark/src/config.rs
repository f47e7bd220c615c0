use std::env;
use std::path::PathBuf;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub environment: Environment,
    pub api_url: String,
    pub api_key: String,
    pub model_id: String,
    pub images_dir: PathBuf,
    pub warmup_requests: usize,
    pub benchmark_requests: usize,
    pub max_concurrent_requests: usize,
    pub max_batch_size: usize,
}

impl BenchmarkConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let api_url =
            env::var("INFERENCE_API_URL").unwrap_or_else(|_| "http://localhost:9001".to_string());

        let api_key = env::var("INFERENCE_API_KEY")
            .map_err(|_| anyhow::anyhow!("INFERENCE_API_KEY must be set"))?;

        let model_id =
            env::var("MODEL_ID").map_err(|_| anyhow::anyhow!("MODEL_ID must be set"))?;

        let images_dir = env::var("IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./images"));

        let warmup_requests = env::var("WARMUP_REQUESTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let benchmark_requests: usize = env::var("BENCHMARK_REQUESTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100);
        anyhow::ensure!(
            benchmark_requests >= 1,
            "BENCHMARK_REQUESTS must be at least 1"
        );

        let max_concurrent_requests = env::var("MAX_CONCURRENT_REQUESTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(4);

        let max_batch_size = env::var("MAX_BATCH_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Ok(Self {
            environment,
            api_url,
            api_key,
            model_id,
            images_dir,
            warmup_requests,
            benchmark_requests,
            max_concurrent_requests,
            max_batch_size,
        })
    }
}
