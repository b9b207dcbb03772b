//! Query-string parsing.
//!
//! Operators may appear anywhere in the string; whatever is left over is the
//! free-text residue. A token that looks like an operator but does not parse
//! (unknown platform, malformed date) stays in the residue rather than being
//! dropped silently.

use chrono::{Local, NaiveDate, TimeZone};

use chatcentral_store::Platform;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub platform: Option<Platform>,
    pub favorite_only: bool,
    /// AND-filtered; tag comparison is case-sensitive.
    pub tags: Vec<String>,
    /// Inclusive lower bound on `updatedAt`, ms.
    pub after: Option<i64>,
    /// Inclusive upper bound on `updatedAt`, ms.
    pub before: Option<i64>,
    /// Case-folded free-text residue.
    pub residue: String,
    /// Whitespace tokens of the residue.
    pub terms: Vec<String>,
}

impl SearchQuery {
    pub fn has_operators(&self) -> bool {
        self.platform.is_some()
            || self.favorite_only
            || !self.tags.is_empty()
            || self.after.is_some()
            || self.before.is_some()
    }
}

/// Start of the named local day, in ms.
fn local_day_start(date: NaiveDate) -> Option<i64> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Last instant of the named local day, in ms.
fn local_day_end(date: NaiveDate) -> Option<i64> {
    let end = date.and_hms_milli_opt(23, 59, 59, 999)?;
    Local
        .from_local_datetime(&end)
        .latest()
        .map(|dt| dt.timestamp_millis())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

pub fn parse_query(input: &str) -> SearchQuery {
    let mut query = SearchQuery::default();
    let mut residue_tokens: Vec<String> = Vec::new();

    for token in input.split_whitespace() {
        if let Some(slug) = token.strip_prefix("platform:") {
            if let Some(platform) = Platform::from_slug(&slug.to_lowercase()) {
                query.platform = Some(platform);
                continue;
            }
        } else if token.eq_ignore_ascii_case("is:favorite") {
            query.favorite_only = true;
            continue;
        } else if let Some(tag) = token.strip_prefix("tag:") {
            if !tag.is_empty() {
                query.tags.push(tag.to_string());
                continue;
            }
        } else if let Some(raw) = token.strip_prefix("before:") {
            if let Some(bound) = parse_date(raw).and_then(local_day_end) {
                query.before = Some(bound);
                continue;
            }
        } else if let Some(raw) = token.strip_prefix("after:") {
            if let Some(bound) = parse_date(raw).and_then(local_day_start) {
                query.after = Some(bound);
                continue;
            }
        }
        residue_tokens.push(token.to_lowercase());
    }

    query.residue = residue_tokens.join(" ");
    query.terms = residue_tokens;
    query
}
