//! Get command implementation.

use super::{connect, ConnectOptions};

/// Runs the get command.
pub async fn run(options: ConnectOptions, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = connect(options).await?;
    let value = client.get(key).await;
    client.shutdown().await;

    match value? {
        Some(body) => {
            println!("{}", String::from_utf8_lossy(&body));
            Ok(())
        }
        None => Err(format!("key not found: {}", key).into()),
    }
}
