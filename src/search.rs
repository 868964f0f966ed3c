// src/search.rs

//! Client-side filtering of an in-memory measurement list.
//!
//! Two call sites search different field sets and are kept as separate
//! policies: the public listing only matches names and tags, the admin
//! table also matches the clinical text and references.
//!
//! There is no index; every query rescans the list, which stays small.

use crate::models::MeasurementRecord;

/// Which fields a query is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPolicy {
    /// title, category, search terms
    Public,
    /// title, category, normal value, description, search terms, references
    Admin,
}

impl SearchPolicy {
    /// Candidate fields of a record under this policy.
    pub fn candidate_fields<'a>(&self, record: &'a MeasurementRecord) -> Vec<&'a str> {
        let mut fields = vec![record.title.as_str(), record.category.as_str()];
        match self {
            SearchPolicy::Public => {
                fields.extend(record.search_terms.iter().map(String::as_str));
            }
            SearchPolicy::Admin => {
                fields.push(record.normal_value.as_str());
                fields.push(record.description.as_str());
                fields.extend(record.search_terms.iter().map(String::as_str));
                fields.extend(record.references.iter().map(String::as_str));
            }
        }
        fields
    }

    /// Whether any candidate field contains the (already lowercased) needle.
    fn matches(&self, record: &MeasurementRecord, needle: &str) -> bool {
        self.candidate_fields(record)
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }
}

/// Records matching `query`, in their original order.
///
/// An empty or whitespace-only query returns every record.
pub fn filter_measurements(
    records: &[MeasurementRecord],
    query: &str,
    policy: SearchPolicy,
) -> Vec<MeasurementRecord> {
    if query.trim().is_empty() {
        return records.to_vec();
    }
    let needle = query.to_lowercase();
    records
        .iter()
        .filter(|record| policy.matches(record, &needle))
        .cloned()
        .collect()
}
