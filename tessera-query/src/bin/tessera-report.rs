//! Runs a small synthetic workload through a runtime built from the
//! environment and prints the operational report as JSON.
//!
//! Logs go to stderr; filter with `RUST_LOG`.

use std::time::Duration;

use serde_json::json;
use tessera_core::TesseraConfig;
use tessera_query::{QueryDescriptor, QueryParams, QueryRuntime};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Row {
    id: u64,
    label: String,
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tessera_query=info,tessera_cache=info,warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}

fn rows(n: u64) -> Vec<Row> {
    (0..n)
        .map(|id| Row {
            id,
            label: format!("row-{id}"),
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing()?;

    let config = TesseraConfig::from_env()?;
    let runtime = QueryRuntime::from_config(&config)?;

    let workload = [
        (
            QueryDescriptor::new("SELECT status, COUNT(*) FROM orders WHERE region = $1 GROUP BY status")
                .accessing("orders", ["region", "status"]),
            Duration::from_millis(40),
            4,
        ),
        (
            QueryDescriptor::new("SELECT * FROM users WHERE email = $1").accessing("users", ["email"]),
            Duration::from_millis(5),
            1,
        ),
        (
            QueryDescriptor::new("SELECT * FROM articles WHERE title ILIKE $1")
                .accessing("articles", ["title"]),
            Duration::from_millis(25),
            1_500,
        ),
    ];

    for round in 0..12u64 {
        for (query, latency, row_count) in &workload {
            let params: QueryParams = [("arg".to_string(), json!(round % 3))].into();
            let latency = *latency;
            let row_count = *row_count;
            let result: Result<Vec<Row>, std::convert::Infallible> = runtime
                .execute(query, &params, || async move {
                    tokio::time::sleep(latency).await;
                    Ok(rows(row_count))
                })
                .await;
            if let Ok(fetched) = result {
                tracing::debug!(rows = fetched.len(), "workload query done");
            }
        }
    }

    let report = runtime.report().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
