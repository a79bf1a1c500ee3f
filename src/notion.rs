//! Notion database client: create-or-update of ranking rows keyed by
//! (date, store, category, rank), plus select-option provisioning.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};
use url::Url;

use crate::http::{HttpClient, HttpError, Request, Transport};
use crate::ranking::RankingRow;

pub const API_BASE: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";

const DATE: &str = "Date";
const STORE: &str = "Store";
const CATEGORY: &str = "Category";
const RANK: &str = "Rank";
const TITLE: &str = "Title";
const URL: &str = "URL";
const THUMB: &str = "Thumb";
const LATEST: &str = "Latest";

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Error)]
pub enum NotionError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("cannot provision {property} option: {message}")]
    Schema { property: String, message: String },
    #[error("unexpected response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<PageRef>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DatabaseSchema {
    properties: HashMap<String, PropertySchema>,
}

#[derive(Debug, Deserialize)]
struct PropertySchema {
    select: Option<SelectSchema>,
}

#[derive(Debug, Deserialize)]
struct SelectSchema {
    #[serde(default)]
    options: Vec<SelectOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SelectOption {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
}

/// Returns the thumbnail only if it is an absolute https URL of an image file.
pub fn validated_thumb(thumb: Option<&str>) -> Option<&str> {
    let candidate = thumb?.trim();
    let parsed = Url::parse(candidate).ok()?;
    if parsed.scheme() != "https" || parsed.host_str().is_none() {
        return None;
    }

    let path = parsed.path().to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| path.ends_with(ext))
        .then_some(candidate)
}

/// Page body without the parent reference: the full property set and,
/// when the thumbnail validates, a cover.
pub fn page_body(row: &RankingRow, mark_latest: bool) -> Value {
    let thumb = validated_thumb(row.thumb.as_deref());

    let files = match thumb {
        Some(url) => json!([{ "type": "external", "name": "thumb", "external": { "url": url } }]),
        None => json!([]),
    };

    let mut properties = json!({
        DATE: { "date": { "start": row.date.to_string() } },
        STORE: { "select": { "name": row.store.as_str() } },
        CATEGORY: { "select": { "name": row.category } },
        RANK: { "number": row.rank },
        TITLE: { "title": [{ "text": { "content": row.title } }] },
        URL: { "url": row.url },
        THUMB: { "files": files },
    });
    if mark_latest {
        properties[LATEST] = json!({ "checkbox": true });
    }

    let mut body = json!({ "properties": properties });
    if let Some(url) = thumb {
        body["cover"] = json!({ "type": "external", "external": { "url": url } });
    }

    body
}

fn key_filter(row: &RankingRow) -> Value {
    json!({
        "and": [
            { "property": DATE, "date": { "equals": row.date.to_string() } },
            { "property": STORE, "select": { "equals": row.store.as_str() } },
            { "property": CATEGORY, "select": { "equals": row.category } },
            { "property": RANK, "number": { "equals": row.rank } },
        ]
    })
}

pub struct NotionClient<T> {
    http: HttpClient<T>,
    api_base: String,
    token: String,
    database_id: String,
    mark_latest: bool,
    // select property name -> known options, loaded on first use
    options: Option<HashMap<String, Vec<SelectOption>>>,
}

impl<T: Transport> NotionClient<T> {
    pub fn new(http: HttpClient<T>, token: &str, database_id: &str, mark_latest: bool) -> Self {
        Self {
            http,
            api_base: API_BASE.to_string(),
            token: token.to_string(),
            database_id: database_id.to_string(),
            mark_latest,
            options: None,
        }
    }

    #[cfg(test)]
    pub fn http(&self) -> &HttpClient<T> {
        &self.http
    }

    #[cfg(test)]
    pub fn into_http(self) -> HttpClient<T> {
        self.http
    }

    pub const fn marks_latest(&self) -> bool {
        self.mark_latest
    }

    fn request(&self, method: Method, path: &str) -> Request {
        Request::new(method, format!("{}/{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", NOTION_VERSION)
            .header("Content-Type", "application/json")
    }

    async fn query(&self, filter: Value, cursor: Option<&str>) -> Result<QueryResponse, NotionError> {
        let path = format!("databases/{}/query", self.database_id);
        let mut body = json!({ "filter": filter, "page_size": 100 });
        if let Some(cursor) = cursor {
            body["start_cursor"] = json!(cursor);
        }

        let response = self.http.request(self.request(Method::POST, &path).json(body)).await?;

        response
            .json()
            .map_err(|source| NotionError::Decode { endpoint: path, source })
    }

    /// Id of the page holding this row's key, if one exists.
    pub async fn find(&self, row: &RankingRow) -> Result<Option<String>, NotionError> {
        let found = self.query(key_filter(row), None).await?;
        Ok(found.results.into_iter().next().map(|page| page.id))
    }

    pub async fn upsert(&mut self, row: &RankingRow) -> Result<UpsertOutcome, NotionError> {
        self.ensure_option(STORE, row.store.as_str()).await?;
        self.ensure_option(CATEGORY, &row.category).await?;

        let mut body = page_body(row, self.mark_latest);

        match self.find(row).await? {
            Some(id) => {
                debug!(%id, rank = row.rank, "update page");
                let request = self.request(Method::PATCH, &format!("pages/{id}")).json(body);
                self.http.request(request).await?;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                body["parent"] = json!({ "database_id": self.database_id });
                let request = self.request(Method::POST, "pages").json(body);
                self.http.request(request).await?;
                Ok(UpsertOutcome::Created)
            }
        }
    }

    async fn load_select_options(&self) -> Result<HashMap<String, Vec<SelectOption>>, NotionError> {
        let path = format!("databases/{}", self.database_id);
        let response = self
            .http
            .request(self.request(Method::GET, &path))
            .await
            .map_err(|e| NotionError::Schema {
                property: "*".to_string(),
                message: e.to_string(),
            })?;

        let schema: DatabaseSchema = response.json().map_err(|e| NotionError::Schema {
            property: "*".to_string(),
            message: format!("unreadable schema from {path}: {e}"),
        })?;

        Ok(schema
            .properties
            .into_iter()
            .filter_map(|(name, property)| property.select.map(|s| (name, s.options)))
            .collect())
    }

    /// Makes sure `value` is one of the options of select `property`,
    /// appending it when missing. Existing options are always sent back.
    pub async fn ensure_option(&mut self, property: &str, value: &str) -> Result<(), NotionError> {
        if self.options.is_none() {
            let loaded = self.load_select_options().await?;
            self.options = Some(loaded);
        }

        let Some(existing) = self.options.as_ref().and_then(|o| o.get(property)) else {
            return Err(NotionError::Schema {
                property: property.to_string(),
                message: "not a select property of the database".to_string(),
            });
        };
        if existing.iter().any(|o| o.name == value) {
            return Ok(());
        }

        let mut options = existing.clone();
        options.push(SelectOption {
            id: None,
            name: value.to_string(),
        });

        let body = json!({ "properties": { property: { "select": { "options": options } } } });
        let request = self
            .request(Method::PATCH, &format!("databases/{}", self.database_id))
            .json(body);
        self.http
            .request(request)
            .await
            .map_err(|e| NotionError::Schema {
                property: property.to_string(),
                message: e.to_string(),
            })?;

        info!(property, value, "added select option");
        if let Some(cache) = self.options.as_mut() {
            cache.insert(property.to_string(), options);
        }

        Ok(())
    }

    /// Unsets the latest flag on every page carrying it. Returns how many
    /// pages were touched.
    pub async fn clear_latest(&self, pace: Duration) -> Result<usize, NotionError> {
        let filter = json!({ "property": LATEST, "checkbox": { "equals": true } });

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.query(filter.clone(), cursor.as_deref()).await?;
            ids.extend(page.results.into_iter().map(|p| p.id));
            match page.next_cursor {
                Some(next) if page.has_more => cursor = Some(next),
                _ => break,
            }
        }

        for id in &ids {
            let body = json!({ "properties": { LATEST: { "checkbox": false } } });
            let request = self.request(Method::PATCH, &format!("pages/{id}")).json(body);
            self.http.request(request).await?;
            sleep(pace).await;
        }

        Ok(ids.len())
    }
}
