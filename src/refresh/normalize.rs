use chrono::DateTime;

use crate::provider::RawItem;
use crate::storage::{CanonicalItem, SourceType};
use crate::util::{html_to_text, strip_control_chars};

const UNTITLED: &str = "Untitled";

/// Shape one provider item into the canonical form persisted by reconcile.
///
/// Pure: no I/O, no clock. The provider's item ID becomes the content ID
/// unchanged. Raw markup is kept next to its plain-text derivation; titles
/// are decoded and flattened to a single line. A missing publish date maps
/// to the Unix epoch so the item sorts last.
pub fn normalize(kind: SourceType, item: RawItem) -> CanonicalItem {
    let content_url = item
        .link
        .filter(|link| !link.trim().is_empty())
        .unwrap_or_else(|| fallback_url(kind, &item.id));

    let body = item.body_markup.as_deref().map(html_to_text);

    CanonicalItem {
        title: single_line(&item.title),
        summary: html_to_text(&item.summary_markup),
        raw_summary: item.summary_markup,
        raw_body: item.body_markup,
        body,
        published_at: item.published_at.unwrap_or(DateTime::UNIX_EPOCH),
        thumbnail_url: item.thumbnail_url.unwrap_or_default(),
        content_url,
        author: item
            .author
            .map(|a| strip_control_chars(a.trim()).into_owned())
            .filter(|a| !a.is_empty()),
        content_id: item.id,
    }
}

fn single_line(markup: &str) -> String {
    let text = html_to_text(markup);
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.is_empty() {
        UNTITLED.to_string()
    } else {
        line
    }
}

/// Canonical page of an item whose payload carried no link.
fn fallback_url(kind: SourceType, id: &str) -> String {
    match kind {
        SourceType::Youtube => format!("https://www.youtube.com/watch?v={}", id),
        SourceType::Vimeo => format!("https://vimeo.com/{}", id),
        // Feed entry IDs are often the article URL itself
        SourceType::Rss if id.starts_with("https://") || id.starts_with("http://") => id.to_string(),
        SourceType::Rss => String::new(),
    }
}
