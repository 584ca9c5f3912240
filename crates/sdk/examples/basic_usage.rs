//! Resolve the cluster leader and print a quick health report.
//!
//! Run with a cluster listening locally:
//!
//! ```sh
//! cargo run --example basic_usage
//! ```

use trivia_cluster_sdk::{ClientConfig, ClusterClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trivia_cluster_sdk=debug".into()),
        )
        .init();

    let config = ClientConfig::builder()
        .with_candidates([
            "http://127.0.0.1:8000",
            "http://127.0.0.1:8001",
            "http://127.0.0.1:8002",
        ])
        .build()?;

    let client = ClusterClient::new(config);

    let leader = client.leader_url(false).await?;
    println!("current leader: {leader}");

    for entry in client.health().await {
        let status = if entry.alive { "alive" } else { "unreachable" };
        println!("{} -> {status}", entry.candidate);
    }

    Ok(())
}
