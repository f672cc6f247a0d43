//! Prints today's events from the primary calendar.
//!
//! Reads `~/.config/gwrap/config.toml` and authorizes through the browser on
//! first use. Set `RUST_LOG=gwrap=debug` for request-level logs.

use chrono::{Duration, Utc};
use gwrap_core::{TracingConfig, init_tracing};
use gwrap_google::{CalendarClient, CredentialManager, EventQuery, HttpConnector, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(TracingConfig::default())?;

    let settings = Settings::load()?;
    let mut manager = CredentialManager::new(&settings)?;
    let connector = HttpConnector::from_settings(&settings);
    let calendar = CalendarClient::connect(None, &mut manager, &connector)?;

    let now = Utc::now();
    let query = EventQuery::new()
        .time_min(now)
        .time_max(now + Duration::hours(24));

    for event in calendar.list_events(&query)? {
        let start = if event.start.date_time.is_none() {
            "all day".to_string()
        } else {
            event
                .start
                .parsed_date_time()
                .map(|time| time.format("%H:%M").to_string())
                .unwrap_or_else(|| "??:??".to_string())
        };
        match event.location {
            Some(location) => println!("{start}  {} ({location})", event.summary),
            None => println!("{start}  {}", event.summary),
        }
    }
    Ok(())
}
