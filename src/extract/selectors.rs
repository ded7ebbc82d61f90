use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::SelectorSpec;
use crate::dates::{fuzzy_parse_date, has_explicit_year, parse_time_text};
use crate::error::{Result, ScoutError};
use crate::extract::{resolve_url, Extractor, Page};
use crate::types::{ExtractionMethod, Seed};

/// Card extraction driven by a source's declared CSS selectors.
pub struct SelectorCardExtractor {
    spec: SelectorSpec,
}

impl SelectorCardExtractor {
    pub fn new(spec: SelectorSpec) -> Self {
        Self { spec }
    }

    fn parse_selector(raw: &str) -> Result<Selector> {
        Selector::parse(raw)
            .map_err(|e| ScoutError::Extraction(format!("bad selector '{raw}': {e:?}")))
    }
}

/// List pages frequently omit the year for near-term listings, so a
/// yearless date that parses into the past means the next occurrence.
pub fn resolve_card_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let parsed = fuzzy_parse_date(text, today.year())?;
    if !has_explicit_year(text) && parsed < today {
        let next_year = parsed.year() + 1;
        return NaiveDate::from_ymd_opt(next_year, parsed.month(), parsed.day())
            .or_else(|| NaiveDate::from_ymd_opt(next_year, 2, 28));
    }
    Some(parsed)
}

fn element_text(element: &scraper::ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Extractor for SelectorCardExtractor {
    fn name(&self) -> &'static str {
        "selector_cards"
    }

    async fn discover(&self, page: &Page, today: NaiveDate) -> Result<Vec<Seed>> {
        let document = Html::parse_document(&page.html);
        let card_selector = Self::parse_selector(&self.spec.card)?;
        let title_selector = Self::parse_selector(&self.spec.title)?;
        let date_selector = self
            .spec
            .date
            .as_deref()
            .map(Self::parse_selector)
            .transpose()?;
        let time_selector = self
            .spec
            .time
            .as_deref()
            .map(Self::parse_selector)
            .transpose()?;
        let url_selector = self
            .spec
            .url
            .as_deref()
            .map(Self::parse_selector)
            .transpose()?;
        let image_selector = self
            .spec
            .image
            .as_deref()
            .map(Self::parse_selector)
            .transpose()?;

        let mut seeds = Vec::new();
        for card in document.select(&card_selector) {
            let title = match card.select(&title_selector).next() {
                Some(el) => element_text(&el),
                None => {
                    debug!("Card without title on {}; skipping", page.url);
                    continue;
                }
            };
            if title.is_empty() {
                continue;
            }

            let raw_date_text = date_selector
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty());
            let date = raw_date_text
                .as_deref()
                .and_then(|text| resolve_card_date(text, today));

            let raw_time_text = time_selector
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .map(|el| element_text(&el));
            // Time may live inside the date text when no dedicated
            // selector is configured.
            let time = raw_time_text
                .as_deref()
                .or(raw_date_text.as_deref())
                .and_then(parse_time_text);

            let detail_url = url_selector
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .or_else(|| {
                    // Fall back to the first anchor in the card.
                    let anchor = Selector::parse("a").ok()?;
                    card.select(&anchor).next()
                })
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| resolve_url(&page.url, href));

            let image_url = image_selector
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .and_then(|el| el.value().attr("src").or(el.value().attr("data-src")))
                .and_then(|src| resolve_url(&page.url, src));

            seeds.push(Seed {
                title,
                raw_date_text,
                date,
                time,
                detail_url,
                ticket_url: None,
                image_url,
                description: None,
                extraction_method: ExtractionMethod::Selector,
                page_url: page.url.clone(),
            });
        }

        if seeds.is_empty() {
            warn!("Selector extraction yielded nothing on {}", page.url);
        }
        Ok(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SelectorSpec {
        SelectorSpec {
            card: ".event-card".to_string(),
            title: "h3".to_string(),
            date: Some(".date".to_string()),
            time: Some(".time".to_string()),
            url: Some("a.more".to_string()),
            image: Some("img".to_string()),
        }
    }

    const LIST_PAGE: &str = r#"
        <html><body>
          <div class="event-card">
            <h3>Jazz Night</h3>
            <span class="date">March 14</span>
            <span class="time">7:30 PM</span>
            <a class="more" href="/events/jazz-night">Details</a>
            <img src="/img/jazz.jpg">
          </div>
          <div class="event-card">
            <h3>Blues Night</h3>
            <span class="date">Dec 2</span>
            <a class="more" href="/events/blues-night">Details</a>
          </div>
          <div class="event-card"><span class="date">No title here</span></div>
        </body></html>
    "#;

    #[tokio::test]
    async fn extracts_cards_with_resolved_fields() {
        let extractor = SelectorCardExtractor::new(spec());
        let page = Page::new("https://riverfrontjazz.example/schedule", LIST_PAGE);
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

        let seeds = extractor.discover(&page, today).await.unwrap();
        assert_eq!(seeds.len(), 2);

        let jazz = &seeds[0];
        assert_eq!(jazz.title, "Jazz Night");
        assert_eq!(jazz.date, NaiveDate::from_ymd_opt(2026, 3, 14));
        assert_eq!(jazz.time, chrono::NaiveTime::from_hms_opt(19, 30, 0));
        assert_eq!(
            jazz.detail_url.as_deref(),
            Some("https://riverfrontjazz.example/events/jazz-night")
        );
        assert_eq!(
            jazz.image_url.as_deref(),
            Some("https://riverfrontjazz.example/img/jazz.jpg")
        );
    }

    #[tokio::test]
    async fn yearless_past_dates_roll_to_next_year() {
        let extractor = SelectorCardExtractor::new(spec());
        let page = Page::new("https://riverfrontjazz.example/schedule", LIST_PAGE);
        let today = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

        let seeds = extractor.discover(&page, today).await.unwrap();
        // "Dec 2" with no year parses to 2026-12-02, which is in the
        // future already, so it stays.
        assert_eq!(seeds[1].date, NaiveDate::from_ymd_opt(2026, 12, 2));
    }

    #[test]
    fn resolve_card_date_rolls_forward_only_without_explicit_year() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 15).unwrap();
        assert_eq!(
            resolve_card_date("May 1", today),
            NaiveDate::from_ymd_opt(2027, 5, 1)
        );
        assert_eq!(
            resolve_card_date("May 1, 2026", today),
            NaiveDate::from_ymd_opt(2026, 5, 1)
        );
    }
}
