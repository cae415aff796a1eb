//! `udcn benchmark` — send many Interests and report RTT statistics.

use anyhow::Result;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use udcn_common::name::Name;
use udcn_common::packet::Interest;

use crate::client::Connection;

const REQUEST_TIMEOUT: Duration = Duration::from_millis(4000);

pub async fn run_benchmark(count: usize, prefix: String, concurrent: usize) -> Result<()> {
    info!("running benchmark: count={count}, prefix={prefix}, concurrent={concurrent}");

    println!("Starting µDCN benchmark");
    println!("======================");
    println!("Parameters:");
    println!("  Interest count: {count}");
    println!("  Name prefix: {prefix}");
    println!("  Concurrent connections: {concurrent}");
    println!();

    let start_time = Instant::now();
    let results = Arc::new(Mutex::new(BenchmarkResults::new(count)));

    let batch_size = std::cmp::max(1, count / concurrent);
    let mut tasks = Vec::new();

    for batch_index in 0..concurrent {
        let start_index = batch_index * batch_size;
        if start_index >= count {
            break;
        }
        let end_index = if batch_index == concurrent - 1 { count } else { start_index + batch_size };

        let prefix_clone = prefix.clone();
        let results_clone = Arc::clone(&results);

        tasks.push(tokio::spawn(async move {
            let mut conn = match Connection::connect().await {
                Ok(c) => c,
                Err(err) => {
                    eprintln!("batch {batch_index} could not connect: {err}");
                    return;
                }
            };

            for i in start_index..end_index {
                let name = Name::from_str(&format!("{prefix_clone}/{i}"));
                let mut interest = Interest::new(name);
                interest.can_be_prefix = false;
                interest.must_be_fresh = true;

                let request_start = Instant::now();
                let outcome = async {
                    conn.send_interest(&interest).await?;
                    conn.recv_content(REQUEST_TIMEOUT).await
                }
                .await;
                let rtt_ms = request_start.elapsed().as_millis() as u64;

                let mut results = results_clone.lock().await;
                match outcome {
                    Ok(_) => {
                        results.successful_requests += 1;
                        results.min_rtt_ms = results.min_rtt_ms.min(rtt_ms);
                        results.max_rtt_ms = results.max_rtt_ms.max(rtt_ms);
                        results.total_rtt_ms += rtt_ms;
                    }
                    Err(_) => results.failed_or_timed_out += 1,
                }
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }

    let total_time_ms = start_time.elapsed().as_millis() as u64;
    let mut final_results = results.lock().await;
    final_results.total_time_ms = total_time_ms;
    print_benchmark_results(&final_results);

    Ok(())
}

struct BenchmarkResults {
    total_interests: usize,
    successful_requests: usize,
    failed_or_timed_out: usize,
    total_time_ms: u64,
    min_rtt_ms: u64,
    max_rtt_ms: u64,
    total_rtt_ms: u64,
}

impl BenchmarkResults {
    fn new(total_interests: usize) -> Self {
        Self {
            total_interests,
            successful_requests: 0,
            failed_or_timed_out: 0,
            total_time_ms: 0,
            min_rtt_ms: u64::MAX,
            max_rtt_ms: 0,
            total_rtt_ms: 0,
        }
    }
}

fn print_benchmark_results(results: &BenchmarkResults) {
    println!("\n\nBenchmark Results");
    println!("=================");
    println!("Total Interests Sent: {}", results.total_interests);
    println!(
        "Successful Requests: {} ({:.2}%)",
        results.successful_requests,
        (results.successful_requests as f64 / results.total_interests as f64) * 100.0
    );
    println!(
        "Failed / Timed Out: {} ({:.2}%)",
        results.failed_or_timed_out,
        (results.failed_or_timed_out as f64 / results.total_interests as f64) * 100.0
    );

    println!("\nTiming:");
    println!("Total Time: {:.2} seconds", results.total_time_ms as f64 / 1000.0);

    if results.successful_requests > 0 {
        println!(
            "Throughput: {:.2} interests/second",
            results.total_interests as f64 / (results.total_time_ms as f64 / 1000.0)
        );
        println!("Min RTT: {} ms", results.min_rtt_ms);
        println!("Max RTT: {} ms", results.max_rtt_ms);
        println!("Avg RTT: {:.2} ms", results.total_rtt_ms as f64 / results.successful_requests as f64);
    }
}
