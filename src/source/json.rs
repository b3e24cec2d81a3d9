//! JSON API source mapped with JSON pointers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::{
    ScrapeRequest, SourceAdapter, parse_release_date, parse_runtime, parse_score,
    render_url_template,
};
use crate::config::{CompletenessWeights, ConfigError, JsonFieldMap, JsonSourceSettings};
use crate::http::{CrawlerError, FetchOptions, FetchResponse, ResilientClient};
use crate::identifier::{Format, Identifier};
use crate::record::Record;
use crate::util::{absolutize_url, collapse_whitespace};

/// JSON API source.
///
/// An API that answers with a document lacking the title is treated as not
/// carrying the identifier.
pub struct JsonSource {
    name: String,
    formats: Vec<Format>,
    url_template: String,
    fields: JsonFieldMap,
    client: Arc<ResilientClient>,
}

impl std::fmt::Debug for JsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSource")
            .field("name", &self.name)
            .field("formats", &self.formats)
            .field("url_template", &self.url_template)
            .finish_non_exhaustive()
    }
}

impl JsonSource {
    /// Creates the source, checking that every pointer is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty URL template or a pointer
    /// that does not start with `/`.
    pub fn new(
        name: impl Into<String>,
        formats: Vec<Format>,
        settings: &JsonSourceSettings,
        client: Arc<ResilientClient>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if settings.url_template.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("sources.{name}.url_template"),
                "must not be empty",
            ));
        }
        let f = &settings.fields;
        let pointers = [
            &f.title,
            &f.synopsis,
            &f.release_date,
            &f.runtime,
            &f.score,
            &f.studio,
            &f.director,
            &f.cast,
            &f.tags,
            &f.cover,
            &f.sample_images,
            &f.trailer,
        ];
        if let Some(bad) = pointers
            .iter()
            .filter_map(|p| p.as_deref())
            .find(|p| !p.is_empty() && !p.starts_with('/'))
        {
            return Err(ConfigError::invalid(
                format!("sources.{name}.fields"),
                format!("JSON pointer '{bad}' must start with '/'"),
            ));
        }
        Ok(Self {
            name,
            formats,
            url_template: settings.url_template.clone(),
            fields: settings.fields.clone(),
            client,
        })
    }
}

#[async_trait]
impl SourceAdapter for JsonSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> &[Format] {
        &self.formats
    }

    #[instrument(skip(self, request), fields(source = %self.name, id = %request.identifier))]
    async fn fetch(&self, request: &ScrapeRequest) -> Result<FetchResponse, CrawlerError> {
        let url = render_url_template(&self.url_template, &request.identifier);
        debug!(%url, "fetching API document");
        let options = FetchOptions::default()
            .with_priority(request.priority)
            .with_accept("application/json");
        self.client.fetch(&url, &options).await
    }

    fn parse(&self, identifier: &Identifier, response: &FetchResponse) -> Result<Record, CrawlerError> {
        let document: Value = serde_json::from_str(&response.body).map_err(|error| {
            CrawlerError::other(&response.url, format!("invalid JSON document: {error}"))
        })?;
        let base = Url::parse(&response.url).ok();
        let f = &self.fields;
        let text = |pointer: &Option<String>| lookup(&document, pointer).and_then(scalar_text);

        let mut record = Record::new(identifier.normalized(), &self.name);
        record.source_url = Some(response.url.clone());
        record.title = text(&f.title);
        if record.title.is_none() {
            return Err(CrawlerError::not_found(&response.url));
        }
        record.synopsis = text(&f.synopsis);
        record.release_date = text(&f.release_date).and_then(|v| parse_release_date(&v));
        record.runtime_minutes = text(&f.runtime).and_then(|v| parse_runtime(&v));
        record.score = text(&f.score).and_then(|v| parse_score(&v));
        record.studio = text(&f.studio).or_else(|| identifier.studio().map(str::to_string));
        record.director = text(&f.director);
        for name in list_text(lookup(&document, &f.cast)) {
            record.push_cast(&name);
        }
        for tag in list_text(lookup(&document, &f.tags)) {
            record.insert_tag(&tag);
        }
        record.cover_url = text(&f.cover).and_then(|v| absolutize_url(&v, base.as_ref()));
        for url in list_text(lookup(&document, &f.sample_images)) {
            if let Some(url) = absolutize_url(&url, base.as_ref()) {
                record.push_sample_image(&url);
            }
        }
        record.trailer_url = text(&f.trailer).and_then(|v| absolutize_url(&v, base.as_ref()));

        Ok(record.with_completeness(&CompletenessWeights::default()))
    }
}

fn lookup<'a>(document: &'a Value, pointer: &Option<String>) -> Option<&'a Value> {
    document.pointer(pointer.as_deref()?).filter(|v| !v.is_null())
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => collapse_whitespace(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Object(map) => return map.get("name").and_then(scalar_text),
        Value::Array(_) | Value::Null => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Arrays of strings or `{ "name": .. }` objects; a single string is split on commas.
fn list_text(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(Value::String(s)) => s
            .split([',', '、'])
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty())
            .collect(),
        Some(other) => scalar_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}
