//! Payload extraction
//!
//! An [`Extractor`] turns a successful payload into the targets it points to
//! and, optionally, one record for the sink. Extraction has no side effects;
//! the worker pool admits the discovered targets and emits the record.

use crate::config::{ExtractConfig, ExtractKind};
use crate::crawler::outcome::Payload;
use crate::frontier::Target;
use crate::sink::ExtractedRecord;
use crate::url::{normalize_url, DomainFilter};
use scraper::{Html, Selector};
use serde_json::{json, Value};
use thiserror::Error;
use url::{form_urlencoded, Url};

/// What a payload yielded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub discovered: Vec<Target>,
    pub record: Option<ExtractedRecord>,
}

/// Errors that make a payload unusable
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload has no value at {0}")]
    MissingField(String),

    #[error("Value at {pointer} is not {expected}")]
    UnexpectedShape {
        pointer: String,
        expected: &'static str,
    },

    #[error("Invalid page URL: {0}")]
    InvalidBaseUrl(String),
}

/// Extraction collaborator used by the worker pool
pub trait Extractor: Send + Sync {
    fn extract(&self, target: &Target, payload: &Payload) -> Result<Extraction, ExtractionError>;
}

/// Builds the extractor selected by `[extract] kind`
pub fn build_extractor(config: &ExtractConfig) -> Box<dyn Extractor> {
    match config.kind {
        ExtractKind::Json => Box::new(JsonExtractor::new(config)),
        ExtractKind::Html => Box::new(HtmlExtractor::new(config)),
    }
}

/// Replaces `{}` with the form-encoded `value`
fn fill_template(template: &str, value: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    template.replace("{}", &encoded)
}

/// Renders a JSON scalar as a target identifier
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extractor for JSON APIs
///
/// - record: the whole body, or the sub-tree at `record-pointer`
/// - discovery: every item of the array at `discover-pointer`, optionally
///   narrowed by `discover-item-pointer` and wrapped by `discover-template`
/// - pagination: the cursor at `next-pointer`, wrapped by `next-template`
#[derive(Debug, Clone)]
pub struct JsonExtractor {
    emit_records: bool,
    record_pointer: Option<String>,
    discover_pointer: Option<String>,
    discover_item_pointer: Option<String>,
    discover_template: Option<String>,
    next_pointer: Option<String>,
    next_template: Option<String>,
}

impl JsonExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            emit_records: config.emit_records,
            record_pointer: config.record_pointer.clone(),
            discover_pointer: config.discover_pointer.clone(),
            discover_item_pointer: config.discover_item_pointer.clone(),
            discover_template: config.discover_template.clone(),
            next_pointer: config.next_pointer.clone(),
            next_template: config.next_template.clone(),
        }
    }

    fn discover(&self, body: &Value) -> Result<Vec<Target>, ExtractionError> {
        let pointer = match &self.discover_pointer {
            Some(pointer) => pointer,
            None => return Ok(Vec::new()),
        };

        // An absent or null list is an empty page, not an error
        let items = match body.pointer(pointer) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ExtractionError::UnexpectedShape {
                    pointer: pointer.clone(),
                    expected: "an array",
                })
            }
        };

        let targets = items
            .iter()
            .filter_map(|item| match &self.discover_item_pointer {
                Some(item_pointer) => item.pointer(item_pointer),
                None => Some(item),
            })
            .filter_map(scalar_to_string)
            .map(|id| match &self.discover_template {
                Some(template) => Target::new(fill_template(template, &id)),
                None => Target::new(id),
            })
            .collect();

        Ok(targets)
    }

    fn next_page(&self, body: &Value) -> Option<Target> {
        let cursor = body.pointer(self.next_pointer.as_deref()?)?;
        let cursor = scalar_to_string(cursor)?;

        Some(match &self.next_template {
            Some(template) => Target::new(fill_template(template, &cursor)),
            None => Target::new(cursor),
        })
    }
}

impl Extractor for JsonExtractor {
    fn extract(&self, target: &Target, payload: &Payload) -> Result<Extraction, ExtractionError> {
        let body: Value = serde_json::from_str(&payload.body)?;

        let record = if self.emit_records {
            let data = match &self.record_pointer {
                Some(pointer) => body
                    .pointer(pointer)
                    .ok_or_else(|| ExtractionError::MissingField(pointer.clone()))?
                    .clone(),
                None => body.clone(),
            };
            Some(ExtractedRecord::new(target, data))
        } else {
            None
        };

        let mut discovered = self.discover(&body)?;
        if let Some(next) = self.next_page(&body) {
            discovered.push(next);
        }

        Ok(Extraction { discovered, record })
    }
}

/// Extractor for HTML pages
///
/// Records the page title and follows links that stay inside the allowed
/// domains. Raw HTML is never stored.
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    emit_records: bool,
    filter: DomainFilter,
}

impl HtmlExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            emit_records: config.emit_records,
            filter: DomainFilter::new(config.allowed_domains.iter().cloned()),
        }
    }
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Collects `<a href>` (minus downloads) and canonical links
fn extract_hrefs(document: &Html) -> Vec<&str> {
    let mut hrefs = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        hrefs.extend(
            document
                .select(&a_selector)
                .filter(|element| element.value().attr("download").is_none())
                .filter_map(|element| element.value().attr("href")),
        );
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        hrefs.extend(
            document
                .select(&canonical_selector)
                .filter_map(|element| element.value().attr("href")),
        );
    }

    hrefs
}

/// Resolves a link href against the page URL
///
/// Returns None for script, mail, phone and data links, same-page anchors,
/// and anything that does not resolve to HTTP(S).
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    normalize_url(absolute.as_str()).ok()
}

impl Extractor for HtmlExtractor {
    fn extract(&self, target: &Target, payload: &Payload) -> Result<Extraction, ExtractionError> {
        let base_url = Url::parse(&payload.final_url)
            .map_err(|e| ExtractionError::InvalidBaseUrl(format!("{}: {}", payload.final_url, e)))?;
        let document = Html::parse_document(&payload.body);

        let mut links: Vec<Url> = extract_hrefs(&document)
            .into_iter()
            .filter_map(|href| resolve_link(href, &base_url))
            .filter(|url| self.filter.allows(url))
            .collect();
        links.sort();
        links.dedup();

        let record = self.emit_records.then(|| {
            ExtractedRecord::new(
                target,
                json!({
                    "url": payload.final_url,
                    "status": payload.status,
                    "title": extract_title(&document),
                    "links": links.len(),
                }),
            )
        });

        let discovered = links
            .into_iter()
            .map(|url| Target::new(String::from(url)))
            .collect();

        Ok(Extraction { discovered, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str) -> Payload {
        Payload {
            status: 200,
            final_url: "https://example.com/dir/page".to_string(),
            body: body.to_string(),
        }
    }

    fn ids(extraction: &Extraction) -> Vec<&str> {
        extraction.discovered.iter().map(Target::as_str).collect()
    }

    #[test]
    fn test_json_record_pointer() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            record_pointer: Some("/data".to_string()),
            ..Default::default()
        });

        let extraction = extractor
            .extract(
                &Target::from_id(170001),
                &payload(r#"{"code":0,"data":{"aid":170001,"title":"t"}}"#),
            )
            .unwrap();

        let record = extraction.record.unwrap();
        assert_eq!(record.target(), "170001");
        assert_eq!(record.data()["title"], "t");
        assert!(extraction.discovered.is_empty());
    }

    #[test]
    fn test_json_missing_record_is_error() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            record_pointer: Some("/data".to_string()),
            ..Default::default()
        });

        let result = extractor.extract(&Target::from_id(1), &payload(r#"{"code":0}"#));
        assert!(matches!(result, Err(ExtractionError::MissingField(_))));
    }

    #[test]
    fn test_json_discovery_with_item_pointer_and_template() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            emit_records: false,
            discover_pointer: Some("/data/list".to_string()),
            discover_item_pointer: Some("/id".to_string()),
            discover_template: Some("https://api.example.com/item/{}".to_string()),
            ..Default::default()
        });

        let extraction = extractor
            .extract(
                &Target::new("list"),
                &payload(r#"{"data":{"list":[{"id":1},{"id":"two"},{"name":"no id"}]}}"#),
            )
            .unwrap();

        assert!(extraction.record.is_none());
        assert_eq!(
            ids(&extraction),
            vec![
                "https://api.example.com/item/1",
                "https://api.example.com/item/two"
            ]
        );
    }

    #[test]
    fn test_json_discovery_of_plain_ids() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            discover_pointer: Some("/related".to_string()),
            ..Default::default()
        });

        let extraction = extractor
            .extract(&Target::from_id(1), &payload(r#"{"related":[2,3]}"#))
            .unwrap();
        assert_eq!(ids(&extraction), vec!["2", "3"]);
    }

    #[test]
    fn test_json_discovery_rejects_non_array() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            discover_pointer: Some("/related".to_string()),
            ..Default::default()
        });

        let result = extractor.extract(&Target::from_id(1), &payload(r#"{"related":5}"#));
        assert!(matches!(
            result,
            Err(ExtractionError::UnexpectedShape { .. })
        ));
    }

    #[test]
    fn test_json_next_cursor_is_encoded() {
        let extractor = JsonExtractor::new(&ExtractConfig {
            next_pointer: Some("/paging/cursor".to_string()),
            next_template: Some("https://api.example.com/feed?cursor={}".to_string()),
            ..Default::default()
        });

        let extraction = extractor
            .extract(
                &Target::new("https://api.example.com/feed"),
                &payload(r#"{"paging":{"cursor":"a=b&c"}}"#),
            )
            .unwrap();
        assert_eq!(
            ids(&extraction),
            vec!["https://api.example.com/feed?cursor=a%3Db%26c"]
        );

        let last_page = extractor
            .extract(
                &Target::new("https://api.example.com/feed"),
                &payload(r#"{"paging":{"cursor":null}}"#),
            )
            .unwrap();
        assert!(last_page.discovered.is_empty());
    }

    #[test]
    fn test_json_invalid_body() {
        let extractor = JsonExtractor::new(&ExtractConfig::default());
        let result = extractor.extract(&Target::from_id(1), &payload("<html>"));
        assert!(matches!(result, Err(ExtractionError::InvalidJson(_))));
    }

    #[test]
    fn test_html_title_and_links() {
        let extractor = HtmlExtractor::new(&ExtractConfig {
            kind: ExtractKind::Html,
            ..Default::default()
        });
        let html = r##"
            <html><head>
              <title>  Test Page  </title>
              <link rel="canonical" href="https://example.com/dir/page">
            </head><body>
              <a href="/a">A</a>
              <a href="b?utm_source=x">B</a>
              <a href="/a#frag">A again</a>
              <a href="#top">Top</a>
              <a href="mailto:x@example.com">Mail</a>
              <a href="JavaScript:void(0)">JS</a>
              <a href="/file.zip" download>Zip</a>
            </body></html>
        "##;

        let extraction = extractor
            .extract(&Target::new("https://example.com/dir/page"), &payload(html))
            .unwrap();

        assert_eq!(
            ids(&extraction),
            vec![
                "https://example.com/a",
                "https://example.com/dir/b",
                "https://example.com/dir/page",
            ]
        );

        let record = extraction.record.unwrap();
        assert_eq!(record.data()["title"], "Test Page");
        assert_eq!(record.data()["links"], 3);
    }

    #[test]
    fn test_html_links_filtered_by_domain() {
        let extractor = HtmlExtractor::new(&ExtractConfig {
            kind: ExtractKind::Html,
            allowed_domains: vec!["*.example.com".to_string()],
            ..Default::default()
        });
        let html = r#"<a href="https://blog.example.com/x">in</a><a href="https://other.org/y">out</a>"#;

        let extraction = extractor
            .extract(&Target::new("https://example.com/"), &payload(html))
            .unwrap();
        assert_eq!(ids(&extraction), vec!["https://blog.example.com/x"]);
    }
}
