use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local};
use tracing_subscriber::EnvFilter;

use comanda::config::DEFAULT_CONFIG_FILE;
use comanda::{Channel, CliChannel, Engine, EngineConfig, Scheduler};

/// Local hour at which all conversations are cleared, end of the workday.
const DAILY_RESET_HOUR: u32 = 16;

fn until_next_reset(now: DateTime<Local>) -> Duration {
    let today_reset = now
        .date_naive()
        .and_hms_opt(DAILY_RESET_HOUR, 0, 0)
        .expect("valid reset time");
    let mut target = today_reset;
    if now.naive_local() >= today_reset {
        target += chrono::Duration::days(1);
    }
    (target - now.naive_local())
        .to_std()
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

async fn daily_reset(engine: Arc<Engine>, scheduler: Arc<Scheduler>) {
    loop {
        let pause = until_next_reset(Local::now());
        tracing::info!(seconds = pause.as_secs(), "next daily reset scheduled");
        tokio::time::sleep(pause).await;
        tracing::info!("running end-of-day conversation reset");
        scheduler.clear_all();
        engine.reset_all();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::load(Path::new(DEFAULT_CONFIG_FILE))?;
    let channel: Arc<dyn Channel> = Arc::new(CliChannel::new());
    let engine = Engine::from_config(channel.clone(), &config);
    let scheduler = Scheduler::new(engine.clone());

    tokio::spawn(daily_reset(engine.clone(), scheduler.clone()));

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let listener = channel.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.listen(tx).await {
            tracing::error!(error = %e, "channel listener stopped");
        }
    });

    tracing::info!(channel = channel.name(), "engine ready");
    while let Some(msg) = rx.recv().await {
        scheduler.ingest(msg).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reset_later_today_when_before_the_hour() {
        let now = Local.with_ymd_and_hms(2025, 12, 3, 10, 0, 0).unwrap();
        assert_eq!(until_next_reset(now), Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn reset_rolls_to_tomorrow_after_the_hour() {
        let now = Local.with_ymd_and_hms(2025, 12, 3, 17, 0, 0).unwrap();
        assert_eq!(until_next_reset(now), Duration::from_secs(23 * 60 * 60));
    }
}
