mod config;

use anyhow::Context;
use client::{ImageReference, InferenceConfiguration, InferenceHttpClient};
use common::setup_logging;
use config::BenchmarkConfig;
use std::time::{Duration, Instant};

fn main() -> anyhow::Result<()> {
    let config = BenchmarkConfig::from_env()?;
    setup_logging(config.environment);

    let mut client = InferenceHttpClient::new(&config.api_url, &config.api_key);
    client.configure(InferenceConfiguration {
        max_concurrent_requests: config.max_concurrent_requests,
        max_batch_size: config.max_batch_size,
        ..Default::default()
    });

    let info = client
        .get_server_info()
        .context("Failed to reach the inference server - check INFERENCE_API_URL")?;
    tracing::info!(
        server = info.name.as_deref().unwrap_or("unknown"),
        version = info.version.as_deref().unwrap_or("unknown"),
        "Connected to inference server"
    );

    let extensions = client
        .inference_configuration()
        .image_extensions_for_directory_scan
        .clone();
    let image_paths = client::loaders::scan_directory_for_images(&config.images_dir, &extensions)
        .with_context(|| format!("Failed to scan {}", config.images_dir.display()))?;
    anyhow::ensure!(
        !image_paths.is_empty(),
        "No images found in {}",
        config.images_dir.display()
    );
    tracing::info!(
        images = image_paths.len(),
        model_id = %config.model_id,
        "Benchmark input loaded"
    );

    tracing::info!(requests = config.warmup_requests, "Warming up");
    for index in 0..config.warmup_requests {
        let path = &image_paths[index % image_paths.len()];
        client
            .infer(ImageReference::Path(path.clone()), Some(&config.model_id))
            .with_context(|| format!("Warm-up request {index} failed"))?;
    }

    tracing::info!(requests = config.benchmark_requests, "Measuring");
    let mut latencies = Vec::with_capacity(config.benchmark_requests);
    let run_start = Instant::now();
    for index in 0..config.benchmark_requests {
        let path = &image_paths[index % image_paths.len()];
        let request_start = Instant::now();
        client
            .infer(ImageReference::Path(path.clone()), Some(&config.model_id))
            .with_context(|| format!("Benchmark request {index} failed"))?;
        latencies.push(request_start.elapsed());
    }
    let elapsed = run_start.elapsed();

    report(&mut latencies, elapsed);
    Ok(())
}

fn report(latencies: &mut [Duration], elapsed: Duration) {
    if latencies.is_empty() {
        tracing::warn!("No requests were measured, nothing to report");
        return;
    }
    latencies.sort_unstable();
    let total: Duration = latencies.iter().sum();
    let average = total / latencies.len() as u32;
    let throughput = latencies.len() as f64 / elapsed.as_secs_f64();

    tracing::info!(
        requests = latencies.len(),
        elapsed_s = format!("{:.2}", elapsed.as_secs_f64()),
        avg_ms = format!("{:.1}", average.as_secs_f64() * 1000.0),
        p50_ms = format!("{:.1}", percentile(latencies, 50).as_secs_f64() * 1000.0),
        p95_ms = format!("{:.1}", percentile(latencies, 95).as_secs_f64() * 1000.0),
        p99_ms = format!("{:.1}", percentile(latencies, 99).as_secs_f64() * 1000.0),
        rps = format!("{:.1}", throughput),
        "Benchmark finished"
    );
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[Duration], pct: usize) -> Duration {
    let rank = (sorted.len() * pct).div_ceil(100);
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}
