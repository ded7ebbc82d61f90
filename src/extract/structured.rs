use async_trait::async_trait;
use chrono::NaiveDate;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::dates::{fuzzy_parse_date, parse_time_text};
use crate::error::Result;
use crate::extract::{resolve_url, Extractor, Page};
use crate::types::{ExtractionMethod, Seed};

/// Extraction from schema.org Event markup embedded as JSON-LD, with a
/// meta-tag/time-element fallback for pages that skip structured data.
pub struct StructuredDataExtractor {
    /// Whether to fall back to og: meta tags and <time> elements.
    meta_fallback: bool,
}

impl StructuredDataExtractor {
    pub fn new(meta_fallback: bool) -> Self {
        Self { meta_fallback }
    }

    /// Walk a JSON-LD document, collecting every schema.org Event node.
    /// Handles bare objects, arrays, and @graph containers; malformed
    /// nodes are skipped, never fatal.
    fn collect_event_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    Self::collect_event_nodes(item, out);
                }
            }
            Value::Object(map) => {
                if let Some(graph) = map.get("@graph") {
                    Self::collect_event_nodes(graph, out);
                }
                let is_event = match map.get("@type") {
                    Some(Value::String(t)) => t.contains("Event"),
                    Some(Value::Array(types)) => types
                        .iter()
                        .any(|t| t.as_str().is_some_and(|s| s.contains("Event"))),
                    _ => false,
                };
                if is_event {
                    out.push(value);
                }
            }
            _ => {}
        }
    }

    fn seed_from_event_node(node: &Value, page: &Page, today: NaiveDate) -> Option<Seed> {
        let title = node.get("name")?.as_str()?.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let start = node.get("startDate").and_then(|v| v.as_str());
        let date = start.and_then(|s| fuzzy_parse_date(s, chrono::Datelike::year(&today)));
        let time = start.and_then(|s| {
            // ISO datetimes carry the time after 'T'.
            s.split_once('T')
                .map(|(_, t)| t)
                .and_then(parse_time_text)
        });

        let detail_url = node
            .get("url")
            .and_then(|v| v.as_str())
            .and_then(|href| resolve_url(&page.url, href));

        let image_url = match node.get("image") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => items.first().and_then(|v| v.as_str()).map(String::from),
            Some(Value::Object(map)) => map.get("url").and_then(|v| v.as_str()).map(String::from),
            _ => None,
        }
        .and_then(|src| resolve_url(&page.url, &src));

        let ticket_url = match node.get("offers") {
            Some(Value::Object(map)) => map.get("url").and_then(|v| v.as_str()).map(String::from),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(|o| o.get("url").and_then(|v| v.as_str()))
                .map(String::from),
            _ => None,
        }
        .and_then(|href| resolve_url(&page.url, &href));

        let description = node
            .get("description")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Some(Seed {
            title,
            raw_date_text: start.map(String::from),
            date,
            time,
            detail_url,
            ticket_url,
            image_url,
            description,
            extraction_method: ExtractionMethod::StructuredData,
            page_url: page.url.clone(),
        })
    }

    /// Meta-tag/time-element fallback: og:title plus the first
    /// <time datetime=...> on the page. At most one seed.
    fn extract_from_meta(page: &Page, document: &Html, today: NaiveDate) -> Option<Seed> {
        let title_selector = Selector::parse(r#"meta[property="og:title"]"#).ok()?;
        let title = document
            .select(&title_selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())?;

        let time_selector = Selector::parse("time[datetime]").ok()?;
        let datetime_attr = document
            .select(&time_selector)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .map(String::from);

        let date = datetime_attr
            .as_deref()
            .and_then(|s| fuzzy_parse_date(s, chrono::Datelike::year(&today)));
        let time = datetime_attr
            .as_deref()
            .and_then(|s| s.split_once('T').map(|(_, t)| t).and_then(parse_time_text));

        Some(Seed {
            title,
            raw_date_text: datetime_attr,
            date,
            time,
            detail_url: Some(page.url.clone()),
            ticket_url: None,
            image_url: None,
            description: None,
            extraction_method: ExtractionMethod::MetaTag,
            page_url: page.url.clone(),
        })
    }
}

#[async_trait]
impl Extractor for StructuredDataExtractor {
    fn name(&self) -> &'static str {
        "structured_data"
    }

    async fn discover(&self, page: &Page, today: NaiveDate) -> Result<Vec<Seed>> {
        let document = Html::parse_document(&page.html);
        let script_selector = match Selector::parse(r#"script[type="application/ld+json"]"#) {
            Ok(sel) => sel,
            Err(_) => return Ok(Vec::new()),
        };

        let mut seeds = Vec::new();
        for script in document.select(&script_selector) {
            let raw = script.text().collect::<String>();
            let value: Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    debug!("Skipping malformed JSON-LD block on {}: {}", page.url, e);
                    continue;
                }
            };

            let mut nodes = Vec::new();
            Self::collect_event_nodes(&value, &mut nodes);
            for node in nodes {
                if let Some(seed) = Self::seed_from_event_node(node, page, today) {
                    seeds.push(seed);
                }
            }
        }

        if seeds.is_empty() && self.meta_fallback {
            if let Some(seed) = Self::extract_from_meta(page, &document, today) {
                seeds.push(seed);
            }
        }

        Ok(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_LD_PAGE: &str = r#"
        <html><head>
        <script type="application/ld+json">
        {
          "@context": "https://schema.org",
          "@graph": [
            {
              "@type": "MusicEvent",
              "name": "Jazz Night",
              "startDate": "2026-03-14T19:30:00-07:00",
              "url": "/events/jazz-night",
              "image": {"url": "https://cdn.example/jazz.jpg"},
              "offers": {"url": "https://tickets.example/jazz"},
              "description": "An evening of improvisation."
            },
            {"@type": "Organization", "name": "The Venue"}
          ]
        }
        </script>
        <script type="application/ld+json">not even json</script>
        </head><body></body></html>
    "#;

    const META_PAGE: &str = r#"
        <html><head>
          <meta property="og:title" content="Harbor Lights Festival">
        </head><body>
          <time datetime="2026-08-09T18:00:00">Aug 9</time>
        </body></html>
    "#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 1).unwrap()
    }

    #[tokio::test]
    async fn extracts_events_from_json_ld_graph() {
        let extractor = StructuredDataExtractor::new(true);
        let page = Page::new("https://riverfrontjazz.example/events/jazz-night", JSON_LD_PAGE);

        let seeds = extractor.discover(&page, today()).await.unwrap();
        assert_eq!(seeds.len(), 1);

        let seed = &seeds[0];
        assert_eq!(seed.title, "Jazz Night");
        assert_eq!(seed.extraction_method, ExtractionMethod::StructuredData);
        assert_eq!(seed.date, NaiveDate::from_ymd_opt(2026, 3, 14));
        assert_eq!(seed.time, chrono::NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(
            seed.ticket_url.as_deref(),
            Some("https://tickets.example/jazz")
        );
        assert_eq!(
            seed.image_url.as_deref(),
            Some("https://cdn.example/jazz.jpg")
        );
    }

    #[tokio::test]
    async fn falls_back_to_meta_tags_when_no_json_ld() {
        let extractor = StructuredDataExtractor::new(true);
        let page = Page::new("https://harborlights.example/festival", META_PAGE);

        let seeds = extractor.discover(&page, today()).await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert_eq!(seeds[0].title, "Harbor Lights Festival");
        assert_eq!(seeds[0].extraction_method, ExtractionMethod::MetaTag);
        assert_eq!(seeds[0].date, NaiveDate::from_ymd_opt(2026, 8, 9));
    }

    #[tokio::test]
    async fn no_structured_data_is_an_empty_result_not_an_error() {
        let extractor = StructuredDataExtractor::new(false);
        let page = Page::new("https://example.org/page", "<html><body>hi</body></html>");
        let seeds = extractor.discover(&page, today()).await.unwrap();
        assert!(seeds.is_empty());
    }
}
