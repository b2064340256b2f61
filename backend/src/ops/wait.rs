//! Block until the database accepts connections

use std::time::Duration;

use sqlx::{Connection, PgConnection};

pub const MAX_ATTEMPTS: u32 = 30;
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Try to connect up to `attempts` times, `delay` apart; true once connected
pub async fn wait_for_db(url: &str, attempts: u32, delay: Duration) -> bool {
    for attempt in 1..=attempts {
        match PgConnection::connect(url).await {
            Ok(conn) => {
                if let Err(e) = conn.close().await {
                    tracing::debug!("Closing probe connection failed: {}", e);
                }
                println!("Database is available");
                return true;
            }
            Err(e) => {
                tracing::debug!("Database not ready: {}", e);
                println!("Waiting for database... (Attempt {}/{})", attempt, attempts);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    eprintln!("Database did not become available after {} attempts", attempts);
    false
}
