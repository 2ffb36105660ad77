//! Job normalizer - maps one raw feed item onto a [`JobCandidate`].
//!
//! Feeds disagree on where each field lives, so every field has an ordered
//! list of [`Extractor`]s. The first extractor that yields non-empty text wins.

use chrono::{DateTime, NaiveDate, Utc};

use super::parser::ParsedNode;
use crate::common::utils::generate_dedupe_key;
use crate::domains::jobs::models::JobCandidate;

/// One place a field value may live on an item node.
#[derive(Debug, Clone, Copy)]
pub enum Extractor {
    /// Text of the first child with this name that has any.
    Text(&'static str),
    /// First matching attribute on any child with this name.
    Attribute(&'static str, &'static [&'static str]),
    /// Text of a grandchild, e.g. `author > name`.
    Nested(&'static str, &'static str),
    /// Per child: its text, else one of its attributes.
    TextOrAttribute(&'static str, &'static [&'static str]),
}

impl Extractor {
    pub fn extract<N: ParsedNode>(&self, item: &N) -> Option<String> {
        self.extract_all(item).into_iter().next()
    }

    /// Every non-empty value this extractor finds, in document order.
    pub fn extract_all<N: ParsedNode>(&self, item: &N) -> Vec<String> {
        item.children_named(self.node_name())
            .filter_map(|node| self.read(node))
            .collect()
    }

    fn node_name(&self) -> &'static str {
        match *self {
            Extractor::Text(name)
            | Extractor::Attribute(name, _)
            | Extractor::Nested(name, _)
            | Extractor::TextOrAttribute(name, _) => name,
        }
    }

    fn read<N: ParsedNode>(&self, node: &N) -> Option<String> {
        let attribute = |attrs: &[&str]| clean(attrs.iter().find_map(|a| node.attribute(a)));
        match *self {
            Extractor::Text(_) => clean(node.text()),
            Extractor::Attribute(_, attrs) => attribute(attrs),
            Extractor::Nested(_, child) => clean(node.child(child).and_then(|c| c.text())),
            Extractor::TextOrAttribute(_, attrs) => {
                clean(node.text()).or_else(|| attribute(attrs))
            }
        }
    }
}

const TITLE: &[Extractor] = &[Extractor::Text("title")];
const LINK: &[Extractor] = &[
    Extractor::Text("link"),
    Extractor::Attribute("link", &["href", "HREF"]),
];
const EXTERNAL_ID: &[Extractor] = &[
    Extractor::Text("guid"),
    Extractor::Text("id"),
    Extractor::Text("atom:id"),
];
const PUBLISHED_AT: &[Extractor] = &[
    Extractor::Text("pubDate"),
    Extractor::Text("published"),
    Extractor::Text("updated"),
    Extractor::Text("dc:date"),
];
const COMPANY: &[Extractor] = &[
    Extractor::Text("dc:creator"),
    Extractor::Nested("author", "name"),
    Extractor::Text("author"),
];
const LOCATION: &[Extractor] = &[Extractor::Text("location"), Extractor::Text("job:location")];
const JOB_TYPE: &[Extractor] = &[Extractor::Text("jobType"), Extractor::Text("job:type")];
const REGION: &[Extractor] = &[Extractor::Text("region"), Extractor::Text("job:region")];
const DESCRIPTION: &[Extractor] = &[
    Extractor::Text("content:encoded"),
    Extractor::Text("content"),
    Extractor::Text("summary"),
    Extractor::Text("description"),
];
const CATEGORIES: &[Extractor] = &[
    Extractor::TextOrAttribute("category", &["term"]),
    Extractor::Text("categories"),
    Extractor::Text("categoryName"),
];

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn first_match<N: ParsedNode>(item: &N, extractors: &[Extractor]) -> Option<String> {
    extractors.iter().find_map(|e| e.extract(item))
}

/// Every `category` value (text or `@term`), followed by the first non-empty of
/// `categories` / `categoryName`. De-duplicated case-sensitively in order of
/// first occurrence.
fn categories<N: ParsedNode>(item: &N) -> Vec<String> {
    let [category, rest @ ..] = CATEGORIES else {
        return Vec::new();
    };
    let fallback = rest.iter().map(|e| e.extract_all(item)).find(|v| !v.is_empty());

    let mut values: Vec<String> = Vec::new();
    for value in category.extract_all(item).into_iter().chain(fallback.into_iter().flatten()) {
        if !values.contains(&value) {
            values.push(value);
        }
    }
    values
}

/// Parse the date formats feeds actually use. Unparseable values are dropped.
pub fn parse_published_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

/// Map a raw item to a candidate. Never fails; validation happens later.
pub fn normalize<N: ParsedNode>(source_url: &str, source_name: &str, item: &N) -> JobCandidate {
    let title = first_match(item, TITLE);
    let job_url = first_match(item, LINK);
    let external_id = first_match(item, EXTERNAL_ID);

    let source_url = clean(Some(source_url));
    let stable_part = external_id.as_ref().or(job_url.as_ref()).or(title.as_ref());
    let dedupe_key = match (&source_url, stable_part) {
        (Some(url), Some(stable_part)) => Some(generate_dedupe_key(url, stable_part)),
        _ => None,
    };

    JobCandidate {
        source_url,
        source_name: clean(Some(source_name)),
        external_id,
        job_url,
        dedupe_key,
        title,
        company: first_match(item, COMPANY),
        location: first_match(item, LOCATION),
        description: first_match(item, DESCRIPTION),
        categories: categories(item),
        job_type: first_match(item, JOB_TYPE),
        region: first_match(item, REGION),
        published_at: first_match(item, PUBLISHED_AT).and_then(|raw| parse_published_at(&raw)),
    }
}
