use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use regex::Regex;
use reqwest::Method;
use url::Url;

use crate::http::{HttpClient, HttpError, Request, Transport};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64)";
const ACCEPT_LANGUAGE: &str = "ja-JP,ja;q=0.9";

static META_CHARSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"charset\s*=\s*["']?([A-Za-z0-9_\-]+)"#).unwrap());

/// Something that can hand back the HTML of a page.
pub trait PageSource {
    async fn fetch_page(&self, url: &str) -> Result<String, HttpError>;
}

impl<T: Transport> PageSource for HttpClient<T> {
    async fn fetch_page(&self, url: &str) -> Result<String, HttpError> {
        let request = Request::new(Method::GET, url)
            .header("User-Agent", USER_AGENT)
            .header("Accept-Language", ACCEPT_LANGUAGE);
        let response = self.request(request).await?;

        Ok(decode_html(response.content_type.as_deref(), &response.body))
    }
}

/// Decodes a page body, trying the header charset, then a `<meta>` charset,
/// then statistical detection.
pub fn decode_html(content_type: Option<&str>, bytes: &[u8]) -> String {
    if let Some(charset) = content_type.and_then(|ct| ct.split("charset=").nth(1)) {
        let label = charset.trim().trim_matches('"');
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }

    // ASCII-safe look at the head
    let ascii_head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    if let Some(charset) = META_CHARSET.captures(&ascii_head).and_then(|c| c.get(1)) {
        if let Some(encoding) = Encoding::for_label(charset.as_str().as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return text.into_owned();
        }
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, _, _) = encoding.decode(bytes);

    text.into_owned()
}

/// Resolves `href` against `base`. Protocol-relative links take the base's scheme.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base_url = Url::parse(base).ok()?;
    let joined = base_url.join(href.trim()).ok()?;

    Some(joined.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_uses_header_charset() {
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode("少年マンガ");
        let text = decode_html(Some("text/html; charset=Shift_JIS"), &bytes);
        assert_eq!(text, "少年マンガ");
    }

    #[test]
    fn test_decode_uses_meta_charset() {
        let html = r#"<html><head><meta charset="EUC-JP"></head><body>総合</body></html>"#;
        let (bytes, _, _) = encoding_rs::EUC_JP.encode(html);
        let text = decode_html(Some("text/html"), &bytes);
        assert!(text.contains("総合"));
    }

    #[test]
    fn test_decode_plain_utf8() {
        let text = decode_html(None, "<p>青年マンガ</p>".as_bytes());
        assert_eq!(text, "<p>青年マンガ</p>");
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://www.cmoa.jp", "//cmoa.akamaized.net/a.jpg").as_deref(),
            Some("https://cmoa.akamaized.net/a.jpg")
        );
        assert_eq!(
            resolve_url("https://www.amazon.co.jp", "/dp/123?ref=x").as_deref(),
            Some("https://www.amazon.co.jp/dp/123?ref=x")
        );
        assert_eq!(
            resolve_url("https://www.amazon.co.jp", "http://x/1").as_deref(),
            Some("http://x/1")
        );
    }
}
