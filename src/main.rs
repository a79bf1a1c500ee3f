mod amazon;
mod cmoa;
mod config;
mod export;
mod http;
mod job;
mod notion;
mod page;
mod ranking;
#[cfg(test)]
mod testing;

use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{FixedOffset, Utc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::http::{HttpClient, ReqwestTransport, RetryPolicy};
use crate::job::RunSummary;
use crate::notion::NotionClient;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn banner() -> String {
    let jst = FixedOffset::east_opt(9 * 3600).expect("+09:00 is in range");
    Utc::now().with_timezone(&jst).format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

async fn run(config: &Config) -> Result<RunSummary> {
    let pages = HttpClient::new(
        ReqwestTransport::new(REQUEST_TIMEOUT)?,
        RetryPolicy::default(),
        false,
    );
    let mut notion = NotionClient::new(
        HttpClient::new(
            ReqwestTransport::new(REQUEST_TIMEOUT)?,
            RetryPolicy::default(),
            config.debug,
        ),
        &config.notion_token,
        &config.database_id,
        config.mark_latest,
    );

    let date = ranking::today();
    info!(%date, "ranking date");

    let run = job::run(&pages, &mut notion, &config.sources, config.pace, date).await?;

    if let Some(path) = &config.export {
        export::export_json(&run.rows, path)?;
        info!(path = %path.display(), rows = run.rows.len(), "exported rows");
    }

    Ok(run.summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing secrets end the process here, before any request.
    let config = config::from_env()?;
    init_tracing(config.debug);

    info!("=== START {}", banner());

    match run(&config).await {
        Ok(summary) => {
            info!("=== DONE {} {summary}", banner());
            if summary.failed > 0 {
                bail!("{} rows failed to upsert", summary.failed);
            }
            Ok(())
        }
        Err(e) => {
            error!("{e:#}");
            info!("=== FAILED {}", banner());
            Err(e)
        }
    }
}
