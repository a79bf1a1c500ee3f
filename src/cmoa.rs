use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::http::HttpError;
use crate::page::{PageSource, resolve_url};
use crate::ranking::{ExtractError, Extracted, MAX_RANK, RankingRow, Store};

pub const BASE_URL: &str = "https://www.cmoa.jp";

pub async fn fetch_ranking<P: PageSource>(
    pages: &P,
    category: &str,
    url: &str,
    date: NaiveDate,
) -> Result<Vec<Extracted>, HttpError> {
    debug!(%url, category, "fetch cmoa ranking");
    let html = pages.fetch_page(url).await?;

    Ok(parse_ranking(&html, category, date))
}

pub fn parse_ranking(html: &str, category: &str, date: NaiveDate) -> Vec<Extracted> {
    let document = Html::parse_document(html);
    let item_selector = Selector::parse("ul#ranking_result_list li.search_result_box").unwrap();

    document
        .select(&item_selector)
        .take(MAX_RANK)
        .zip(1u32..)
        .map(|(item, rank)| parse_item(item, category, date, rank))
        .collect()
}

fn parse_item(item: ElementRef<'_>, category: &str, date: NaiveDate, rank: u32) -> Extracted {
    let title_selector = Selector::parse("img[alt]").unwrap();
    let link_selector = Selector::parse("a.title").unwrap();
    let image_selector = Selector::parse("img[src]").unwrap();

    let fail = |reason| ExtractError {
        store: Store::Cmoa,
        category: category.to_string(),
        rank,
        reason,
    };

    let title = item
        .select(&title_selector)
        .next()
        .and_then(|img| img.value().attr("alt"))
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .ok_or_else(|| fail("no title image"))?;

    let url = item
        .select(&link_selector)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_url(BASE_URL, href))
        .ok_or_else(|| fail("no title link"))?;

    // src is often protocol-relative (`//cmoa.akamaized.net/...`)
    let thumb = item
        .select(&image_selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .and_then(|src| resolve_url(BASE_URL, src));

    Ok(RankingRow {
        date,
        store: Store::Cmoa,
        category: category.to_string(),
        rank,
        title: title.to_string(),
        url,
        thumb,
    })
}
