//! Writes rows to four simulated shards through a reactor cluster.
//!
//! Run with `METRICS_ADDR=127.0.0.1:9000` to expose Prometheus metrics while
//! the demo runs, and `RUST_LOG=batch_reactor=debug` for lifecycle logs.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use batch_reactor::{
    Completion, ReactorCluster, ReactorConfig, ReactorError, RetryPolicyConfig, hash_partitioner,
    observability,
};
use tracing_subscriber::EnvFilter;

const SHARDS: usize = 4;
const PRODUCERS: usize = 8;
const ROWS_PER_PRODUCER: usize = 250;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        observability::install_prometheus_exporter(addr.parse()?)?;
    }

    let config = ReactorConfig {
        max_batch_size: 50,
        no_work_backoff_ms: 5,
        retry_policy: Some(RetryPolicyConfig::Bounded { max_retries: 2 }),
        ..ReactorConfig::default()
    };

    let mut cluster = ReactorCluster::named(
        "shard",
        SHARDS,
        config.into_options(),
        |shard, run: &mut dyn FnMut(&mut Vec<String>)| {
            let mut rows = Vec::new();
            run(&mut rows);
            // Shard 3 drops the occasional large write.
            if shard == 3 && rows.len() > 40 {
                return Completion::error(ReactorError::batch(format!(
                    "shard {shard} rejected {} rows",
                    rows.len()
                )));
            }
            tracing::info!(shard, rows = rows.len(), "flushed batch");
            Completion::value(())
        },
    );
    cluster.define_partitioner(hash_partitioner::<str>(SHARDS));
    cluster.start().wait()?;

    let cluster = Arc::new(cluster);
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let cluster = Arc::clone(&cluster);
            thread::spawn(move || {
                (0..ROWS_PER_PRODUCER)
                    .map(|row| {
                        let tenant = format!("tenant-{}", row % 17);
                        let line = format!("{tenant},{producer},{row}");
                        cluster.perform_within_batch(tenant.as_str(), move |rows: &mut Vec<String>| {
                            rows.push(line.clone());
                            rows.len()
                        })
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut written = 0;
    let mut failed = 0;
    for producer in producers {
        let pending = producer.join().map_err(|_| "producer thread panicked")?;
        for completion in pending {
            match completion.wait() {
                Ok(_) => written += 1,
                Err(error) => {
                    tracing::warn!(%error, "row not written");
                    failed += 1;
                }
            }
        }
    }

    cluster.stop().wait()?;
    tracing::info!(written, failed, "done");

    if std::env::var("METRICS_ADDR").is_ok() {
        // Leave time for a final scrape.
        thread::sleep(Duration::from_secs(2));
    }
    Ok(())
}
