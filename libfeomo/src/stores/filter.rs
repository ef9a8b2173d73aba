//! Client-side status filters

use chrono::NaiveDate;

use crate::types::{Status, Visibility};

/// One condition a status has to meet. Filters are combined with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    /// Tag name, with or without the leading `#`; case-insensitive
    TagSearch(String),
    /// Substring of the plain text content; case-insensitive
    ContentSearch(String),
    /// Posted on this (UTC) day
    DisplayTime(NaiveDate),
    Pinned,
    HasLink,
    HasTaskList,
    HasCode,
    Visibility(Visibility),
}

impl StatusFilter {
    pub fn matches(&self, status: &Status) -> bool {
        let content = status.content.as_str();

        match self {
            StatusFilter::TagSearch(tag) => {
                let wanted = tag.trim_start_matches('#').to_lowercase();
                status
                    .tags
                    .iter()
                    .any(|t| t.name.to_lowercase() == wanted)
            }
            StatusFilter::ContentSearch(needle) => plain_text(content)
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            StatusFilter::DisplayTime(day) => status.created_at.date_naive() == *day,
            StatusFilter::Pinned => status.pinned == Some(true),
            StatusFilter::HasLink => has_anchor(content),
            StatusFilter::HasTaskList => content
                .to_ascii_lowercase()
                .contains(r#"type="checkbox""#),
            StatusFilter::HasCode => {
                content.contains("<code") || content.contains("<pre") || content.contains("```")
            }
            StatusFilter::Visibility(visibility) => status.visibility == *visibility,
        }
    }
}

/// Statuses matching every filter; all of them when `filters` is empty.
pub fn filter_statuses(statuses: &[Status], filters: &[StatusFilter]) -> Vec<Status> {
    statuses
        .iter()
        .filter(|status| filters.iter().all(|filter| filter.matches(status)))
        .cloned()
        .collect()
}

/// Text content of an HTML fragment.
pub fn plain_text(html: &str) -> String {
    let stripped = ammonia::Builder::empty().clean(html).to_string();
    html_escape::decode_html_entities(&stripped).into_owned()
}

fn has_anchor(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    lower
        .match_indices("<a")
        .any(|(at, _)| lower[at + 2..].starts_with(|c: char| c.is_ascii_whitespace()))
}
