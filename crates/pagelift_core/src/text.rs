use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use scraper::Html;

use crate::error::DataError;

/// Timestamp layout used by legacy source exports.
const SOURCE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Strip markup from a legacy title and bound its length. Tags are dropped,
/// entities are decoded, surrounding whitespace is trimmed, and the result
/// is cut to `max_len` characters.
pub fn clean_title(raw: &str, max_len: usize) -> String {
    let fragment = Html::parse_fragment(raw);
    let text: String = fragment.root_element().text().collect();
    text.trim().chars().take(max_len).collect()
}

/// Parse a legacy `YYYY-MM-DD HH:MM:SS` timestamp as local time in `offset`.
pub fn parse_source_date(
    raw: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, DataError> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), SOURCE_DATE_FORMAT)
        .map_err(|_| DataError::Date(raw.to_string()))?;
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| DataError::Date(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Timelike};

    use super::{clean_title, parse_source_date};
    use crate::error::DataError;

    #[test]
    fn markup_and_entities_are_removed_from_titles() {
        assert_eq!(
            clean_title("<p>Annual <em>report</em> 2014</p>", 255),
            "Annual report 2014"
        );
        assert_eq!(clean_title("Fish &amp; chips", 255), "Fish & chips");
        assert_eq!(clean_title("  plain  ", 255), "plain");
    }

    #[test]
    fn overlong_titles_are_truncated_by_characters() {
        let raw = "x".repeat(300);
        assert_eq!(clean_title(&raw, 255).chars().count(), 255);
        assert_eq!(clean_title("héllo wörld", 5), "héllo");
    }

    #[test]
    fn source_dates_parse_in_the_configured_offset() {
        let offset = FixedOffset::east_opt(3600).expect("offset");
        let parsed = parse_source_date("2014-03-01 09:30:00", offset).expect("parse");
        assert_eq!(parsed.hour(), 9);
        assert_eq!(parsed.offset(), &offset);
        assert_eq!(parsed.to_rfc3339(), "2014-03-01T09:30:00+01:00");
    }

    #[test]
    fn malformed_dates_are_rejected() {
        let offset = FixedOffset::east_opt(0).expect("offset");
        let error = parse_source_date("01/02/2020", offset).expect_err("must fail");
        assert!(matches!(error, DataError::Date(_)));
        assert!(error.to_string().contains("01/02/2020"));
    }
}
