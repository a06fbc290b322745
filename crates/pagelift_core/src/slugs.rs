use std::collections::HashSet;

use slug::slugify;

/// Pick `requested` if free, otherwise the first `requested-N` not in
/// `taken`, counting from 1. `taken` must hold every sibling slug that
/// starts with `requested` for the result to be collision-free.
pub fn find_available_slug(requested: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(requested) {
        return requested.to_string();
    }
    let mut suffix = 1u64;
    loop {
        let candidate = format!("{requested}-{suffix}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

/// The slug a legacy page record asks for, before collision handling.
/// An explicit slug wins verbatim (trimmed), then the last segment of the
/// legacy URL path, then the cleaned title.
pub fn requested_page_slug(
    explicit: Option<&str>,
    legacy_url: Option<&str>,
    title: &str,
) -> String {
    if let Some(explicit) = explicit {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(url) = legacy_url
        && let Some(segment) = last_path_segment(url)
    {
        return slugify(&segment);
    }
    slugify(title)
}

/// The slug a content record asks for: explicit slug, then title.
pub fn requested_content_slug(explicit: Option<&str>, title: &str) -> String {
    if let Some(explicit) = explicit {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    slugify(title)
}

/// Last non-empty segment of a URL path, percent-decoded. Query string and
/// fragment are discarded first.
fn last_path_segment(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    let path = match without_query.find("://") {
        Some(scheme_end) => without_query[scheme_end + 3..]
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(""),
        None => without_query.trim_start_matches('/'),
    };
    let segment = path.rsplit('/').find(|segment| !segment.is_empty())?;
    let decoded = urlencoding::decode(segment)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    let decoded = decoded.trim();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{find_available_slug, last_path_segment, requested_page_slug};

    fn taken(slugs: &[&str]) -> HashSet<String> {
        slugs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn free_slug_is_used_unchanged() {
        assert_eq!(find_available_slug("report", &taken(&[])), "report");
    }

    #[test]
    fn collisions_get_the_first_free_suffix() {
        assert_eq!(find_available_slug("report", &taken(&["report"])), "report-1");
        assert_eq!(
            find_available_slug("report", &taken(&["report", "report-1", "report-2"])),
            "report-3"
        );
        // a gap in the suffixes is reused
        assert_eq!(
            find_available_slug("report", &taken(&["report", "report-2"])),
            "report-1"
        );
    }

    #[test]
    fn explicit_slug_wins_over_url_and_title() {
        assert_eq!(
            requested_page_slug(Some(" my-slug "), Some("http://x/y/other"), "Title"),
            "my-slug"
        );
        // blank explicit slug falls through
        assert_eq!(
            requested_page_slug(Some("  "), Some("http://x/news/annual-report"), "Title"),
            "annual-report"
        );
    }

    #[test]
    fn url_segment_is_decoded_and_slugified() {
        assert_eq!(
            requested_page_slug(None, Some("http://old.example/news/Fish%20%26%20Chips"), "T"),
            "fish-chips"
        );
        // trailing slash: last non-empty segment wins
        assert_eq!(
            requested_page_slug(None, Some("http://old.example/news/report/"), "T"),
            "report"
        );
    }

    #[test]
    fn title_is_the_fallback() {
        assert_eq!(
            requested_page_slug(None, None, "Annual Report 2014"),
            "annual-report-2014"
        );
        assert_eq!(
            requested_page_slug(None, Some("http://old.example/"), "Annual Report"),
            "annual-report"
        );
    }

    #[test]
    fn path_segments_ignore_query_and_fragment() {
        assert_eq!(
            last_path_segment("http://x/news/post?page=2#top").as_deref(),
            Some("post")
        );
        assert_eq!(last_path_segment("/news/post"), Some("post".to_string()));
        assert_eq!(last_path_segment("http://x/"), None);
    }
}
