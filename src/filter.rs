//! Client-side list filters. Collections are fetched once and narrowed in
//! memory; every call recomputes from scratch.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::record::{FieldValue, Record};

static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D+").expect("static regex"));
static PHONE_QUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s+().-]+$").expect("static regex"));

const PROPERTY_SEARCH_FIELDS: &[&str] = &["title", "reference", "city", "address"];
const PROSPECT_SEARCH_FIELDS: &[&str] = &["first_name", "last_name", "email"];

pub trait RecordFilter {
    fn matches(&self, record: &Record) -> bool;

    /// Matching records, in input order.
    fn apply<'a>(&self, records: &'a [Record]) -> Vec<&'a Record> {
        records.iter().filter(|record| self.matches(record)).collect()
    }
}

fn text_of(record: &Record, field: &str) -> Option<String> {
    match record.field(field)? {
        FieldValue::Text(s) => Some(s.to_lowercase()),
        FieldValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn contains_term(record: &Record, fields: &[&str], term: &str) -> bool {
    fields
        .iter()
        .filter_map(|field| text_of(record, field))
        .any(|value| value.contains(term))
}

fn normalized_term(search: &str) -> Option<String> {
    let term = search.trim().to_lowercase();
    (!term.is_empty()).then_some(term)
}

fn tab_matches(record: &Record, field: &str, tab: Option<&str>) -> bool {
    match tab.map(str::trim).filter(|tab| !tab.is_empty() && *tab != "all") {
        None => true,
        Some(tab) => text_of(record, field).is_some_and(|value| value == tab.to_lowercase()),
    }
}

fn number_of(record: &Record, field: &str) -> Option<f64> {
    record.field(field).and_then(FieldValue::as_f64)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    pub search: String,
    /// Matched against `transaction_type` (`sale`, `rent`, ...); `all` or
    /// empty disables it.
    pub tab: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_bedrooms: Option<f64>,
}

impl RecordFilter for PropertyFilter {
    fn matches(&self, record: &Record) -> bool {
        if let Some(term) = normalized_term(&self.search) {
            if !contains_term(record, PROPERTY_SEARCH_FIELDS, &term) {
                return false;
            }
        }
        if !tab_matches(record, "transaction_type", self.tab.as_deref()) {
            return false;
        }
        if self.min_price.is_some() || self.max_price.is_some() {
            let Some(price) = number_of(record, "price") else {
                return false;
            };
            if self.min_price.is_some_and(|min| price < min) {
                return false;
            }
            if self.max_price.is_some_and(|max| price > max) {
                return false;
            }
        }
        if let Some(min) = self.min_bedrooms {
            if !number_of(record, "bedrooms").is_some_and(|bedrooms| bedrooms >= min) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProspectFilter {
    pub search: String,
    pub status: Option<String>,
}

impl RecordFilter for ProspectFilter {
    fn matches(&self, record: &Record) -> bool {
        if let Some(term) = normalized_term(&self.search) {
            let digits = NON_DIGITS.replace_all(&term, "");
            let phone_hit = PHONE_QUERY.is_match(&term)
                && !digits.is_empty()
                && text_of(record, "phone")
                    .map(|phone| NON_DIGITS.replace_all(&phone, "").contains(&*digits))
                    .unwrap_or(false);
            if !phone_hit && !contains_term(record, PROSPECT_SEARCH_FIELDS, &term) {
                return false;
            }
        }
        tab_matches(record, "status", self.status.as_deref())
    }
}
