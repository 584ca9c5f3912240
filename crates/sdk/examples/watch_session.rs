//! Follow a trivia session's realtime frames, surviving leader failover.
//!
//! ```sh
//! cargo run --example watch_session -- ROOM1
//! ```

use trivia_cluster_sdk::{ClientConfig, ClusterClient, SessionEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trivia_cluster_sdk=info".into()),
        )
        .init();

    let session_code = std::env::args().nth(1).unwrap_or_else(|| "ROOM1".to_owned());

    let config = ClientConfig::builder()
        .with_candidates([
            "http://127.0.0.1:8000",
            "http://127.0.0.1:8001",
            "http://127.0.0.1:8002",
        ])
        .build()?;

    let client = ClusterClient::new(config);
    let session = client.open_session(session_code);
    let mut events = session.subscribe();
    session.connect()?;

    loop {
        match events.recv().await {
            Ok(SessionEvent::Open { leader }) => println!("connected to {leader}"),
            Ok(SessionEvent::Frame(frame)) => {
                println!("[{}] {}", frame.event, serde_json::Value::Object(frame.payload));
            }
            Ok(SessionEvent::Closed) => println!("connection lost, recovering..."),
            Ok(SessionEvent::Error { reason }) => eprintln!("error: {reason}"),
            Ok(SessionEvent::Exhausted { attempts }) => {
                eprintln!("gave up after {attempts} attempts; press Ctrl-C or wait");
                session.reconnect()?;
            }
            Err(err) => {
                eprintln!("event stream lagged or closed: {err}");
                break;
            }
        }
    }

    Ok(())
}
