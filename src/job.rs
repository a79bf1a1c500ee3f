use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::{SourceConfig, Sources};
use crate::http::{HttpError, Transport};
use crate::notion::{NotionClient, NotionError, UpsertOutcome};
use crate::page::PageSource;
use crate::ranking::{Extracted, RankingRow, Store};
use crate::{amazon, cmoa};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created={} updated={} skipped={} failed={}",
            self.created, self.updated, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Default)]
pub struct Run {
    pub summary: RunSummary,
    pub rows: Vec<RankingRow>,
}

async fn extract<P: PageSource>(
    pages: &P,
    store: Store,
    source: &SourceConfig,
    date: NaiveDate,
) -> Result<Vec<Extracted>, HttpError> {
    match store {
        Store::Amazon => amazon::fetch_ranking(pages, &source.category, &source.url, date).await,
        Store::Cmoa => cmoa::fetch_ranking(pages, &source.category, &source.url, date).await,
    }
}

/// Scrapes every configured source and upserts each row, one at a time.
/// Listing and row failures are counted and skipped; schema failures abort.
pub async fn run<P, T>(
    pages: &P,
    notion: &mut NotionClient<T>,
    sources: &Sources,
    pace: Duration,
    date: NaiveDate,
) -> Result<Run>
where
    P: PageSource,
    T: Transport,
{
    if notion.marks_latest() {
        let cleared = notion
            .clear_latest(pace)
            .await
            .context("clearing latest flag")?;
        info!(cleared, "cleared latest flag");
    }

    let plan = sources
        .amazon
        .iter()
        .map(|s| (Store::Amazon, s))
        .chain(sources.cmoa.iter().map(|s| (Store::Cmoa, s)));

    let mut run = Run::default();

    for (store, source) in plan {
        let rows = match extract(pages, store, source, date).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(%store, category = %source.category, error = %e, "listing unavailable, skipping category");
                continue;
            }
        };
        info!(%store, category = %source.category, entries = rows.len(), "listing parsed");

        for extracted in rows {
            let mut row = match extracted {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, "skipped row");
                    run.summary.skipped += 1;
                    continue;
                }
            };
            if store == Store::Amazon {
                amazon::resolve_thumb(pages, &mut row).await;
            }

            match notion.upsert(&row).await {
                Ok(outcome) => {
                    info!(%store, category = %row.category, rank = row.rank, title = %row.title, "{outcome}");
                    match outcome {
                        UpsertOutcome::Created => run.summary.created += 1,
                        UpsertOutcome::Updated => run.summary.updated += 1,
                    }
                }
                Err(e @ NotionError::Schema { .. }) => return Err(e.into()),
                Err(e) => {
                    error!(%store, category = %row.category, rank = row.rank, error = %e, "upsert failed");
                    run.summary.failed += 1;
                }
            }
            run.rows.push(row);

            sleep(pace).await;
        }
    }

    Ok(run)
}
