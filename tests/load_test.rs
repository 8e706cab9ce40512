//! Concurrent load through the gateway, checking correlation ids stay per request.

use std::time::{Duration, Instant};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_load_keeps_correlation_ids_apart() {
    let backend = common::start_mock_backend("{\"hello\":\"from backend\"}").await;

    let mut config = common::gateway_config(&backend.url());
    config.rate_limit.enabled = false;
    config.retries.enabled = false;

    let gateway = common::start_gateway(config).await;

    // Every request carries its own id; each must come back unchanged.
    let concurrency = 20;
    let requests_per_task = 50;
    let total_requests = concurrency * requests_per_task;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let start = Instant::now();

    let mut tasks = Vec::new();
    for task_no in 0..concurrency {
        let client = client.clone();
        let url = gateway.url("/api/products");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for i in 0..requests_per_task {
                let req_start = Instant::now();
                let id = format!("load-{}-{}", task_no, i);
                if let Ok(res) = client.get(&url).header("X-Correlation-Id", &id).send().await {
                    let echoed = res
                        .headers()
                        .get("x-correlation-id")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    if res.status().is_success() && echoed.as_deref() == Some(id.as_str()) {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies: Vec<Duration> = Vec::new();
    for task in tasks {
        all_latencies.extend(task.await.unwrap());
    }

    let duration = start.elapsed();
    let rps = total_requests as f64 / duration.as_secs_f64();

    assert!(!all_latencies.is_empty(), "No successful requests recorded");

    all_latencies.sort();
    let p50 = all_latencies[all_latencies.len() / 2];
    let p95 = all_latencies[(all_latencies.len() as f64 * 0.95) as usize];
    let p99 = all_latencies[(all_latencies.len() as f64 * 0.99) as usize];

    println!("\n--- Load Test Results ---");
    println!("Total Requests: {}", total_requests);
    println!("Concurrency:    {}", concurrency);
    println!("Total Duration: {:?}", duration);
    println!("Requests/sec:   {:.2}", rps);
    println!("P50 Latency:    {:?}", p50);
    println!("P95 Latency:    {:?}", p95);
    println!("P99 Latency:    {:?}", p99);
    println!("Success Rate:   {}/{}", all_latencies.len(), total_requests);
    println!("-------------------------\n");

    // Correlation ids never bleed between concurrent requests.
    assert_eq!(all_latencies.len(), total_requests);
    assert_eq!(backend.hits() as usize, total_requests);
}
