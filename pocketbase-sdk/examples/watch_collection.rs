//! Print every change to a collection until Ctrl-C
//!
//! Run with: cargo run -p pocketbase-sdk --example watch_collection -- http://127.0.0.1:8090 posts
//!
//! Set `POCKETBASE_LOG_MODE=development` to see connection and sync logs.

use pocketbase_sdk::logging::init_logging_from_env;
use pocketbase_sdk::{PocketBase, RecordAction, SdkError};

#[tokio::main]
async fn main() -> Result<(), SdkError> {
    if let Err(e) = init_logging_from_env() {
        eprintln!("Logging disabled: {}", e);
    }

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "http://127.0.0.1:8090".to_string());
    let collection = args.next().unwrap_or_else(|| "posts".to_string());

    let client = PocketBase::new(base_url)?;
    if let Ok(token) = std::env::var("POCKETBASE_TOKEN") {
        client.set_auth_token(token);
    }

    let records = client.collection(&collection);
    records
        .subscribe(
            "*",
            |event| {
                let label = match event.action {
                    RecordAction::Create => "created",
                    RecordAction::Update => "updated",
                    RecordAction::Delete => "deleted",
                    RecordAction::Unknown => "changed",
                };
                println!("{} {}", event.record_id().unwrap_or("?"), label);
            },
            None,
        )
        .await?;

    println!(
        "Watching {} as client {}. Press Ctrl-C to stop.",
        collection,
        client
            .realtime()
            .client_id()
            .map(|id| id.to_string())
            .unwrap_or_default()
    );

    let _ = tokio::signal::ctrl_c().await;
    records.unsubscribe(None).await?;
    Ok(())
}
