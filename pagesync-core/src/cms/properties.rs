//! CMS properties carried by rows of the CMS database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::paths::slugify;

/// Role of a CMS page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmsPageType {
    #[default]
    Page,
    Section,
    Gallery,
    Header,
    NavBar,
    Footer,
    Internal,
}

impl CmsPageType {
    /// Header, navbar and footer pages frame other items; they never decide
    /// the type of a node or become a part.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            CmsPageType::Header | CmsPageType::NavBar | CmsPageType::Footer
        )
    }

    /// Framing and internal pages take no part in the content tree.
    pub fn is_content(&self) -> bool {
        !self.is_framing() && *self != CmsPageType::Internal
    }

    fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "page" => Some(CmsPageType::Page),
            "section" => Some(CmsPageType::Section),
            "gallery" => Some(CmsPageType::Gallery),
            "header" => Some(CmsPageType::Header),
            "navbar" | "nav" | "menu" => Some(CmsPageType::NavBar),
            "footer" => Some(CmsPageType::Footer),
            "internal" => Some(CmsPageType::Internal),
            _ => None,
        }
    }
}

pub const MAX_CATEGORY_LEVELS: usize = 6;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CmsProperties {
    #[serde(default)]
    pub page_type: CmsPageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_slug: Option<String>,
    /// `Root`, `Category1` .. `Category5`, in order. Blank levels are dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl CmsProperties {
    /// Reads CMS properties from the simplified property map of a database row.
    pub fn from_row_properties(properties: &Map<String, Value>) -> Self {
        let category_keys = [
            "Root",
            "Category1",
            "Category2",
            "Category3",
            "Category4",
            "Category5",
        ];
        let categories = category_keys
            .iter()
            .take(MAX_CATEGORY_LEVELS)
            .map_while(|key| text_property(properties, key).filter(|s| !s.trim().is_empty()))
            .map(|s| s.trim().to_string())
            .collect();

        Self {
            page_type: text_property(properties, "Type")
                .and_then(|t| CmsPageType::parse(&t))
                .unwrap_or_default(),
            custom_slug: text_property(properties, "Slug").filter(|s| !s.trim().is_empty()),
            categories,
            tags: list_property(properties, "Tags"),
            sequence: properties.get("Sequence").and_then(number_value),
            status: text_property(properties, "Status").filter(|s| !s.is_empty()),
            publish_on: text_property(properties, "Publish On").and_then(|s| parse_date(&s)),
            themes: list_property(properties, "Themes"),
            summary: text_property(properties, "Summary").filter(|s| !s.is_empty()),
        }
    }

    /// Draft and archived rows, and rows scheduled for the future, stay out of the site.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        let hidden_status = self
            .status
            .as_deref()
            .map(|s| s.eq_ignore_ascii_case("draft") || s.eq_ignore_ascii_case("archived"))
            .unwrap_or(false);
        let scheduled = self.publish_on.map(|at| at > now).unwrap_or(false);
        !hidden_status && !scheduled
    }

    /// Slug of the category path, e.g. `/guides/install`, or `""` for none.
    pub fn category_slug(&self) -> String {
        self.categories
            .iter()
            .map(|c| slugify(c))
            .filter(|s| !s.is_empty())
            .map(|s| format!("/{s}"))
            .collect()
    }

    /// Full CMS slug of a page with this title, anchor included for sections.
    pub fn slug(&self, title: &str) -> String {
        if let Some(custom) = &self.custom_slug {
            return normalize_slug(custom);
        }
        let base = self.category_slug();
        let title_slug = slugify(title);
        match self.page_type {
            CmsPageType::Section if !title_slug.is_empty() => format!("{base}#{title_slug}"),
            CmsPageType::Header | CmsPageType::NavBar | CmsPageType::Footer => base,
            _ if title_slug.is_empty() => base,
            _ => format!("{base}/{title_slug}"),
        }
    }
}

/// Canonical slug form: leading `/`, no trailing `/`, lower case; root is `""`.
pub fn normalize_slug(raw: &str) -> String {
    let (path, anchor) = match raw.split_once('#') {
        Some((p, a)) => (p, Some(a)),
        None => (raw, None),
    };
    let segments: Vec<String> = path
        .split('/')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    let mut slug: String = segments.iter().map(|s| format!("/{s}")).collect();
    if let Some(anchor) = anchor.map(slugify).filter(|a| !a.is_empty()) {
        slug.push('#');
        slug.push_str(&anchor);
    }
    slug
}

fn text_property(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

fn list_property(properties: &Map<String, Value>, key: &str) -> Vec<String> {
    match properties.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn number_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parses_row_properties() {
        let p = CmsProperties::from_row_properties(&props(json!({
            "Type": "Nav Bar",
            "Root": "Docs",
            "Category1": "Getting Started",
            "Category2": "",
            "Category3": "ignored after blank",
            "Tags": ["a", " b "],
            "Sequence": 3,
            "Status": "Published",
            "Publish On": "2024-01-02",
            "Themes": "dark, wide",
        })));
        assert_eq!(p.page_type, CmsPageType::NavBar);
        assert_eq!(p.categories, vec!["Docs", "Getting Started"]);
        assert_eq!(p.tags, vec!["a", "b"]);
        assert_eq!(p.sequence, Some(3));
        assert_eq!(p.themes, vec!["dark", "wide"]);
        assert!(p.publish_on.is_some());
    }

    #[test]
    fn slugs_follow_page_type() {
        let mut p = CmsProperties {
            categories: vec!["Docs".into()],
            ..Default::default()
        };
        assert_eq!(p.slug("Setup Guide"), "/docs/setup-guide");

        p.page_type = CmsPageType::Section;
        assert_eq!(p.slug("Install"), "/docs#install");

        p.page_type = CmsPageType::Header;
        assert_eq!(p.slug("Top"), "/docs");

        p.custom_slug = Some("Docs/Setup/#Step One".into());
        assert_eq!(p.slug("ignored"), "/docs/setup#step-one");
    }

    #[test]
    fn drafts_and_scheduled_pages_are_unpublished() {
        let now = Utc::now();
        let mut p = CmsProperties::default();
        assert!(p.is_published(now));
        p.status = Some("Draft".into());
        assert!(!p.is_published(now));
        p.status = None;
        p.publish_on = Some(now + chrono::Duration::days(1));
        assert!(!p.is_published(now));
    }

    #[test]
    fn normalize_slug_handles_root() {
        assert_eq!(normalize_slug("/"), "");
        assert_eq!(normalize_slug(" /A/b/ "), "/a/b");
    }
}
