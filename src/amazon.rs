use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::http::HttpError;
use crate::page::{PageSource, resolve_url};
use crate::ranking::{ExtractError, Extracted, MAX_RANK, RankingRow, Store};

pub const BASE_URL: &str = "https://www.amazon.co.jp";

// Amazon image modifier block, e.g. `._AC_UL300_SR300,200_.` or `._SX160_.`
static SIZE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\._[A-Za-z0-9,_\-]+_\.").unwrap());

pub async fn fetch_ranking<P: PageSource>(
    pages: &P,
    category: &str,
    url: &str,
    date: NaiveDate,
) -> Result<Vec<Extracted>, HttpError> {
    debug!(%url, category, "fetch bestseller listing");
    let html = pages.fetch_page(url).await?;

    Ok(parse_listing(&html, category, date))
}

pub fn parse_listing(html: &str, category: &str, date: NaiveDate) -> Vec<Extracted> {
    let document = Html::parse_document(html);
    let entry_selector = Selector::parse("div.zg-grid-general-faceout").unwrap();

    document
        .select(&entry_selector)
        .take(MAX_RANK)
        .zip(1u32..)
        .map(|(entry, rank)| parse_entry(entry, category, date, rank))
        .collect()
}

fn parse_entry(entry: ElementRef<'_>, category: &str, date: NaiveDate, rank: u32) -> Extracted {
    let title_selector = Selector::parse("img[alt]").unwrap();
    let image_selector = Selector::parse("img[src]").unwrap();
    let link_selector = Selector::parse("a[href]").unwrap();

    let title = entry
        .select(&title_selector)
        .next()
        .and_then(|img| img.value().attr("alt"))
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .map_or_else(|| format!("Rank{rank}"), str::to_string);

    let url = enclosing_link(entry)
        .or_else(|| entry.select(&link_selector).next())
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_url(BASE_URL, href))
        .ok_or_else(|| ExtractError {
            store: Store::Amazon,
            category: category.to_string(),
            rank,
            reason: "no item link",
        })?;

    let thumb = entry
        .select(&image_selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| resolve_url(BASE_URL, src))
        .filter(|src| src.starts_with("https://"))
        .map(|src| larger_rendition(&src));

    Ok(RankingRow {
        date,
        store: Store::Amazon,
        category: category.to_string(),
        rank,
        title,
        url,
        thumb,
    })
}

/// Nearest `a.a-link-normal` wrapping the entry.
fn enclosing_link(entry: ElementRef<'_>) -> Option<ElementRef<'_>> {
    entry
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| {
            el.value().name() == "a"
                && el.value().attr("href").is_some()
                && el.value().classes().any(|c| c == "a-link-normal")
        })
}

pub fn larger_rendition(src: &str) -> String {
    SIZE_TOKEN.replace(src, "._SX800_.").into_owned()
}

/// Fills a missing thumbnail from the detail page's `og:image`. Fetch
/// failures leave the row without one.
pub async fn resolve_thumb<P: PageSource>(pages: &P, row: &mut RankingRow) {
    if row.thumb.is_some() {
        return;
    }

    match pages.fetch_page(&row.url).await {
        Ok(html) => row.thumb = og_image(&html),
        Err(e) => {
            warn!(rank = row.rank, url = %row.url, error = %e, "detail page unavailable, no thumbnail");
        }
    }
}

pub fn og_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let og_selector = Selector::parse(r#"meta[property="og:image"]"#).unwrap();

    document
        .select(&og_selector)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .map(str::trim)
        .filter(|content| content.starts_with("https://"))
        .map(larger_rendition)
}
