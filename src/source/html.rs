//! Selector-table HTML source.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::{
    ScrapeRequest, SourceAdapter, parse_release_date, parse_runtime, parse_score,
    render_url_template,
};
use crate::config::{CompletenessWeights, ConfigError, HtmlSourceSettings, SelectorTable};
use crate::http::{CrawlerError, FetchOptions, FetchResponse, ResilientClient};
use crate::identifier::{Format, Identifier};
use crate::record::Record;
use crate::util::{absolutize_url, collapse_whitespace};

/// Attributes that may carry an image or video URL, most specific first.
const URL_ATTRIBUTES: [&str; 4] = ["data-src", "src", "content", "href"];

#[derive(Debug, Default)]
struct CompiledSelectors {
    title: Option<Selector>,
    synopsis: Option<Selector>,
    release_date: Option<Selector>,
    runtime: Option<Selector>,
    score: Option<Selector>,
    studio: Option<Selector>,
    director: Option<Selector>,
    cast: Option<Selector>,
    tags: Option<Selector>,
    cover: Option<Selector>,
    sample_images: Option<Selector>,
    trailer: Option<Selector>,
}

impl CompiledSelectors {
    fn compile(source_name: &str, table: &SelectorTable) -> Result<Self, ConfigError> {
        let parse = |selector: &Option<String>| -> Result<Option<Selector>, ConfigError> {
            selector
                .as_deref()
                .map(|raw| {
                    Selector::parse(raw).map_err(|error| ConfigError::Selector {
                        source_name: source_name.to_string(),
                        selector: raw.to_string(),
                        reason: error.to_string(),
                    })
                })
                .transpose()
        };
        Ok(Self {
            title: parse(&table.title)?,
            synopsis: parse(&table.synopsis)?,
            release_date: parse(&table.release_date)?,
            runtime: parse(&table.runtime)?,
            score: parse(&table.score)?,
            studio: parse(&table.studio)?,
            director: parse(&table.director)?,
            cast: parse(&table.cast)?,
            tags: parse(&table.tags)?,
            cover: parse(&table.cover)?,
            sample_images: parse(&table.sample_images)?,
            trailer: parse(&table.trailer)?,
        })
    }
}

/// HTML detail-page source driven by a CSS selector table.
pub struct HtmlSource {
    name: String,
    formats: Vec<Format>,
    url_template: String,
    expected_markers: Vec<String>,
    not_found_markers: Vec<String>,
    selectors: CompiledSelectors,
    client: Arc<ResilientClient>,
}

impl std::fmt::Debug for HtmlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlSource")
            .field("name", &self.name)
            .field("formats", &self.formats)
            .field("url_template", &self.url_template)
            .finish_non_exhaustive()
    }
}

impl HtmlSource {
    /// Compiles the selector table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Selector`] for a selector that does not parse and
    /// [`ConfigError::Invalid`] for an empty URL template.
    pub fn new(
        name: impl Into<String>,
        formats: Vec<Format>,
        settings: &HtmlSourceSettings,
        client: Arc<ResilientClient>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if settings.url_template.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("sources.{name}.url_template"),
                "must not be empty",
            ));
        }
        let selectors = CompiledSelectors::compile(&name, &settings.selectors)?;
        Ok(Self {
            name,
            formats,
            url_template: settings.url_template.clone(),
            expected_markers: settings.expected_markers.clone(),
            not_found_markers: settings.not_found_markers.clone(),
            selectors,
            client,
        })
    }

    fn fetch_options(&self, priority: i32) -> FetchOptions {
        // A "no such title" page is a genuine page, not a block.
        let mut markers = self.expected_markers.clone();
        if !markers.is_empty() {
            markers.extend(self.not_found_markers.iter().cloned());
        }
        FetchOptions::default()
            .with_priority(priority)
            .with_markers(markers)
    }
}

#[async_trait]
impl SourceAdapter for HtmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> &[Format] {
        &self.formats
    }

    #[instrument(skip(self, request), fields(source = %self.name, id = %request.identifier))]
    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchResponse, CrawlerError> {
        let url = render_url_template(&self.url_template, &request.identifier);
        debug!(%url, "fetching detail page");
        self.client
            .fetch(&url, &self.fetch_options(request.priority))
            .await
    }

    fn parse(&self, identifier: &Identifier, response: &FetchResponse) -> Result<Record, CrawlerError> {
        if self
            .not_found_markers
            .iter()
            .any(|marker| response.body.contains(marker.as_str()))
        {
            return Err(CrawlerError::not_found(&response.url));
        }

        let document = Html::parse_document(&response.body);
        let base = Url::parse(&response.url).ok();
        let s = &self.selectors;

        let mut record = Record::new(identifier.normalized(), &self.name);
        record.source_url = Some(response.url.clone());
        record.title = first_text(&document, s.title.as_ref());
        if record.title.is_none() {
            return Err(CrawlerError::other(&response.url, "page has no title"));
        }
        record.synopsis = first_text(&document, s.synopsis.as_ref());
        record.release_date =
            first_text(&document, s.release_date.as_ref()).and_then(|v| parse_release_date(&v));
        record.runtime_minutes =
            first_text(&document, s.runtime.as_ref()).and_then(|v| parse_runtime(&v));
        record.score = first_text(&document, s.score.as_ref()).and_then(|v| parse_score(&v));
        record.studio = first_text(&document, s.studio.as_ref())
            .or_else(|| identifier.studio().map(str::to_string));
        record.director = first_text(&document, s.director.as_ref());
        for name in all_text(&document, s.cast.as_ref()) {
            record.push_cast(&name);
        }
        for tag in all_text(&document, s.tags.as_ref()) {
            record.insert_tag(&tag);
        }
        record.cover_url = all_urls(&document, s.cover.as_ref(), base.as_ref())
            .into_iter()
            .next();
        for url in all_urls(&document, s.sample_images.as_ref(), base.as_ref()) {
            record.push_sample_image(&url);
        }
        record.trailer_url = all_urls(&document, s.trailer.as_ref(), base.as_ref())
            .into_iter()
            .next();

        Ok(record.with_completeness(&CompletenessWeights::default()))
    }
}

/// Text of an element, or its `content` attribute for `<meta>` tags.
fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = match element.value().attr("content") {
        Some(content) => collapse_whitespace(content),
        None => collapse_whitespace(&element.text().collect::<String>()),
    };
    (!text.is_empty()).then_some(text)
}

fn first_text(document: &Html, selector: Option<&Selector>) -> Option<String> {
    document.select(selector?).find_map(element_text)
}

fn all_text(document: &Html, selector: Option<&Selector>) -> Vec<String> {
    selector
        .map(|selector| document.select(selector).filter_map(element_text).collect())
        .unwrap_or_default()
}

fn all_urls(document: &Html, selector: Option<&Selector>, base: Option<&Url>) -> Vec<String> {
    let Some(selector) = selector else {
        return Vec::new();
    };
    document
        .select(selector)
        .filter_map(|element| {
            URL_ATTRIBUTES
                .iter()
                .find_map(|attr| element.value().attr(attr))
                .and_then(|value| absolutize_url(value, base))
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::EngineConfig;
    use crate::events::EventBus;
    use crate::identifier::normalize;

    const PAGE: &str = r#"<html><head>
        <meta property="og:title" content="  Summer   Story ">
        </head><body>
        <div class="movie-info">
          <p class="release">発売日: 2023/07/14</p>
          <p class="runtime">収録時間: 120分</p>
          <p class="score">4.25</p>
          <ul class="cast"><li>Momo Sakura</li><li> Aoi </li><li>Momo Sakura</li></ul>
          <ul class="tags"><li>Drama</li><li>Solo</li></ul>
          <img class="cover" src="/img/ipx177pl.jpg">
          <a class="sample" href="https://cdn.example/s1.jpg"><img></a>
          <a class="sample" href="//cdn.example/s2.jpg"><img></a>
        </div></body></html>"#;

    fn source() -> HtmlSource {
        let client = Arc::new(
            ResilientClient::from_config(&EngineConfig::default(), EventBus::default()).unwrap(),
        );
        let settings = HtmlSourceSettings {
            url_template: "https://site.example/v/{id}".to_string(),
            expected_markers: vec!["movie-info".to_string()],
            not_found_markers: vec!["No results".to_string()],
            selectors: SelectorTable {
                title: Some("meta[property='og:title']".to_string()),
                release_date: Some("p.release".to_string()),
                runtime: Some("p.runtime".to_string()),
                score: Some("p.score".to_string()),
                cast: Some("ul.cast li".to_string()),
                tags: Some("ul.tags li".to_string()),
                cover: Some("img.cover".to_string()),
                sample_images: Some("a.sample".to_string()),
                ..SelectorTable::default()
            },
        };
        HtmlSource::new("alpha", vec![Format::Standard], &settings, client).unwrap()
    }

    // ==================== Parse Tests ====================

    #[test]
    fn test_parse_detail_page() {
        let id = normalize("IPX-177").unwrap();
        let response = FetchResponse::new("https://site.example/v/IPX-177", 200, PAGE);
        let record = source().parse(&id, &response).unwrap();

        assert_eq!(record.identifier, "IPX-177");
        assert_eq!(record.title.as_deref(), Some("Summer Story"));
        assert_eq!(record.release_date, NaiveDate::from_ymd_opt(2023, 7, 14));
        assert_eq!(record.runtime_minutes, Some(120));
        assert!((record.score.unwrap() - 4.25).abs() < f32::EPSILON);
        assert_eq!(record.cast, vec!["Momo Sakura", "Aoi"]);
        assert!(record.tags.contains("Drama"));
        assert_eq!(
            record.cover_url.as_deref(),
            Some("https://site.example/img/ipx177pl.jpg")
        );
        assert_eq!(
            record.sample_images,
            vec!["https://cdn.example/s1.jpg", "https://cdn.example/s2.jpg"]
        );
        // Studio falls back to the prefix table when the page has none.
        assert_eq!(record.studio.as_deref(), Some("Idea Pocket"));
        assert_eq!(record.source, "alpha");
        assert!(record.completeness > 0);
    }

    #[test]
    fn test_not_found_marker() {
        let id = normalize("IPX-177").unwrap();
        let response = FetchResponse::new("https://site.example/v/IPX-177", 200, "<p>No results</p>");
        let error = source().parse(&id, &response).unwrap_err();
        assert!(matches!(error, CrawlerError::MovieNotFound { .. }));
    }

    #[test]
    fn test_page_without_title_is_error() {
        let id = normalize("IPX-177").unwrap();
        let response = FetchResponse::new("https://site.example/v/IPX-177", 200, "<div class=\"movie-info\"></div>");
        let error = source().parse(&id, &response).unwrap_err();
        assert!(matches!(error, CrawlerError::Other { .. }));
    }

    // ==================== Construction Tests ====================

    #[test]
    fn test_invalid_selector_is_config_error() {
        let client = Arc::new(
            ResilientClient::from_config(&EngineConfig::default(), EventBus::default()).unwrap(),
        );
        let settings = HtmlSourceSettings {
            url_template: "https://site.example/{id}".to_string(),
            selectors: SelectorTable {
                title: Some("h1[".to_string()),
                ..SelectorTable::default()
            },
            ..HtmlSourceSettings::default()
        };
        let error = HtmlSource::new("alpha", vec![Format::Standard], &settings, client).unwrap_err();
        assert!(matches!(error, ConfigError::Selector { .. }));
    }

    #[test]
    fn test_not_found_markers_count_as_genuine_page() {
        let options = source().fetch_options(2);
        assert_eq!(options.priority, 2);
        assert_eq!(options.expected_markers, vec!["movie-info", "No results"]);
    }
}
