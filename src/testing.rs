//! In-memory stand-ins for the Notion API and scrape targets, plus HTML
//! fixture builders.

use std::cell::RefCell;
use std::collections::HashMap;

use reqwest::{Method, StatusCode};
use serde_json::{Map, Value, json};

use crate::http::{HttpError, Request, Response, Transport, TransportError};
use crate::notion::API_BASE;
use crate::page::PageSource;

pub fn json_response(status: StatusCode, value: &Value) -> Response {
    Response {
        status,
        content_type: Some("application/json".into()),
        retry_after: None,
        body: serde_json::to_vec(value).unwrap(),
    }
}

#[derive(Default)]
struct NotionState {
    pages: Vec<(String, Map<String, Value>)>,
    options: Vec<(String, Vec<String>)>,
    calls: Vec<(Method, String)>,
    page_size: Option<usize>,
}

/// Mimics the database query, page and schema endpoints closely enough
/// for the upsert protocol.
#[derive(Default)]
pub struct FakeNotion {
    state: RefCell<NotionState>,
}

impl FakeNotion {
    pub fn select(self, property: &str, options: &[&str]) -> Self {
        self.state.borrow_mut().options.push((
            property.to_string(),
            options.iter().map(|o| o.to_string()).collect(),
        ));
        self
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.borrow_mut().page_size = Some(size);
    }

    pub fn page_count(&self) -> usize {
        self.state.borrow().pages.len()
    }

    pub fn page(&self, index: usize) -> Value {
        Value::Object(self.state.borrow().pages[index].1.clone())
    }

    pub fn options(&self, property: &str) -> Vec<String> {
        self.state
            .borrow()
            .options
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, o)| o.clone())
            .unwrap_or_default()
    }

    pub fn count_calls(&self, method: &str, fragment: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|(m, url)| m.as_str() == method && url.contains(fragment))
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }
}

fn matches(properties: &Map<String, Value>, filter: &Value) -> bool {
    if let Some(all) = filter.get("and").and_then(Value::as_array) {
        return all.iter().all(|f| matches(properties, f));
    }
    let Some(name) = filter.get("property").and_then(Value::as_str) else {
        return true;
    };
    let actual = properties.get(name);

    for (kind, path) in [
        ("date", "/date/start"),
        ("select", "/select/name"),
        ("number", "/number"),
        ("checkbox", "/checkbox"),
    ] {
        if let Some(expected) = filter.pointer(&format!("/{kind}/equals")) {
            return actual.and_then(|v| v.pointer(path)) == Some(expected);
        }
    }

    false
}

impl NotionState {
    fn query(&self, body: &Value) -> Result<Value, StatusCode> {
        let filter = &body["filter"];
        let hits: Vec<&str> = self
            .pages
            .iter()
            .filter(|(_, props)| matches(props, filter))
            .map(|(id, _)| id.as_str())
            .collect();

        let size = self.page_size.unwrap_or(100);
        let start = body["start_cursor"]
            .as_str()
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0)
            .min(hits.len());
        let end = (start + size).min(hits.len());
        let results: Vec<Value> = hits[start..end]
            .iter()
            .map(|id| json!({ "object": "page", "id": id }))
            .collect();
        let has_more = end < hits.len();

        Ok(json!({
            "results": results,
            "has_more": has_more,
            "next_cursor": has_more.then(|| end.to_string()),
        }))
    }

    fn create(&mut self, body: &Value) -> Result<Value, StatusCode> {
        if body["parent"]["database_id"].as_str().is_none() {
            return Err(StatusCode::BAD_REQUEST);
        }
        let properties = body["properties"]
            .as_object()
            .cloned()
            .ok_or(StatusCode::BAD_REQUEST)?;
        let id = format!("page-{}", self.pages.len() + 1);
        self.pages.push((id.clone(), properties));

        Ok(json!({ "object": "page", "id": id }))
    }

    fn update(&mut self, id: &str, body: &Value) -> Result<Value, StatusCode> {
        let (_, properties) = self
            .pages
            .iter_mut()
            .find(|(page_id, _)| page_id == id)
            .ok_or(StatusCode::NOT_FOUND)?;
        if let Some(changes) = body["properties"].as_object() {
            for (name, value) in changes {
                properties.insert(name.clone(), value.clone());
            }
        }

        Ok(json!({ "object": "page", "id": id }))
    }

    fn schema(&self) -> Value {
        let mut properties = Map::new();
        properties.insert("Rank".into(), json!({ "type": "number", "number": {} }));
        for (name, options) in &self.options {
            let options: Vec<Value> = options
                .iter()
                .enumerate()
                .map(|(i, o)| json!({ "id": format!("{name}-{i}"), "name": o }))
                .collect();
            properties.insert(
                name.clone(),
                json!({ "type": "select", "select": { "options": options } }),
            );
        }

        json!({ "object": "database", "properties": properties })
    }

    fn patch_schema(&mut self, body: &Value) -> Result<Value, StatusCode> {
        let changes = body["properties"].as_object().ok_or(StatusCode::BAD_REQUEST)?;
        for (name, change) in changes {
            let names: Vec<String> = change["select"]["options"]
                .as_array()
                .ok_or(StatusCode::BAD_REQUEST)?
                .iter()
                .filter_map(|o| o["name"].as_str().map(str::to_string))
                .collect();
            match self.options.iter_mut().find(|(n, _)| n == name) {
                Some((_, options)) => *options = names,
                None => self.options.push((name.clone(), names)),
            }
        }

        Ok(self.schema())
    }
}

impl Transport for FakeNotion {
    async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push((request.method.clone(), request.url.clone()));

        let path = request
            .url
            .strip_prefix(API_BASE)
            .unwrap_or(&request.url)
            .trim_start_matches('/')
            .to_string();
        let segments: Vec<&str> = path.split('/').collect();
        let body = request.body.clone().unwrap_or(Value::Null);

        let reply = match (request.method.as_str(), segments.as_slice()) {
            ("POST", ["databases", _, "query"]) => state.query(&body),
            ("POST", ["pages"]) => state.create(&body),
            ("PATCH", ["pages", id]) => state.update(id, &body),
            ("GET", ["databases", _]) => Ok(state.schema()),
            ("PATCH", ["databases", _]) => state.patch_schema(&body),
            _ => Err(StatusCode::NOT_FOUND),
        };

        Ok(match reply {
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(status) => json_response(status, &json!({ "object": "error", "status": status.as_u16() })),
        })
    }
}

#[derive(Default)]
pub struct FakePages {
    pages: HashMap<String, String>,
    requested: RefCell<Vec<String>>,
}

impl FakePages {
    pub fn with(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.borrow().clone()
    }
}

impl PageSource for FakePages {
    async fn fetch_page(&self, url: &str) -> Result<String, HttpError> {
        self.requested.borrow_mut().push(url.to_string());
        self.pages.get(url).cloned().ok_or_else(|| HttpError::Status {
            method: Method::GET,
            url: url.to_string(),
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        })
    }
}

/// Bestseller grid with one faceout per `(title, href)`.
pub fn amazon_listing(entries: &[(&str, &str)]) -> String {
    let items: String = entries
        .iter()
        .zip(1..)
        .map(|((title, href), rank)| {
            format!(
                r#"<div id="gridItemRoot"><span class="zg-bdg-text">#{rank}</span>
                <a class="a-link-normal" href="{href}">
                  <div class="zg-grid-general-faceout">
                    <img alt="{title}" src="https://m.media-amazon.com/images/I/{rank}._AC_UL300_SR300,200_.jpg">
                  </div>
                </a></div>"#
            )
        })
        .collect();

    format!(r#"<html><body><div class="p13n-gridRow">{items}</div></body></html>"#)
}

/// Ranking list with `count` well-formed entries titled 作品1, 作品2, ...
pub fn cmoa_ranking(count: usize) -> String {
    let items: String = (1..=count)
        .map(|i| {
            format!(
                r#"<li class="search_result_box">
                  <div class="search_result_box_left"><a href="/title/{i}/">
                    <img src="//cmoa.akamaized.net/data/image/title/{i}/thumb.jpg" alt="作品{i}">
                  </a></div>
                  <div class="search_result_box_right"><a class="title" href="/title/{i}/">作品{i}</a></div>
                </li>"#
            )
        })
        .collect();

    format!(r#"<html><body><ul id="ranking_result_list">{items}</ul></body></html>"#)
}
