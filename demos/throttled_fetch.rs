//! Throttled fetch demo
//!
//! Launches a headless session, warms up cookies, then fetches one URL with
//! the usual pre-navigation delay.
//!
//! Run with: cargo run --example throttled_fetch -- /path/to/chromedriver https://example.com

use stealthdriver::{BrowserSession, SessionConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stealthdriver::init_logging();

    let mut args = std::env::args().skip(1);
    let driver_path = args
        .next()
        .unwrap_or_else(|| "/usr/bin/chromedriver".to_string());
    let url = args
        .next()
        .unwrap_or_else(|| "https://example.com".to_string());

    let config = SessionConfig::new(driver_path)
        .headless(true)
        .window_size(1024, 768)
        .wait_range(1, 3);

    let session = BrowserSession::new(config).await?;

    session.warm_up_cookies().await?;
    session.navigate(&url).await?;

    println!("Fetched {} as {}", url, session.user_agent());

    session.close().await?;
    Ok(())
}
