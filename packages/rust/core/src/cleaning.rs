//! Input cleaning for part-code lists.
//!
//! Pasted lists often carry row numbers ("1", "12", "3.") next to the real
//! material numbers; those are dropped as noise before a run starts.

use std::collections::HashSet;

use serde::Serialize;

use assemblybuilder_shared::PartCode;

/// Longest all-digit token still treated as a row number.
const MAX_ROW_NUMBER_DIGITS: usize = 3;

/// Why a token was removed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Empty,
    RowNumber,
    Duplicate,
}

/// A removed token and the reason it was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedToken {
    pub token: String,
    pub reason: DropReason,
}

/// Result of [`clean_codes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanedCodes {
    /// Remaining codes, in input order.
    pub codes: Vec<PartCode>,
    pub dropped: Vec<DroppedToken>,
}

/// Trim, drop empties and row-number noise, and optionally dedupe (first occurrence wins).
pub fn clean_codes<S: AsRef<str>>(raw: &[S], dedupe: bool, filter_noise: bool) -> CleanedCodes {
    let mut cleaned = CleanedCodes::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for token in raw {
        let trimmed = token.as_ref().trim();
        let reason = if trimmed.is_empty() {
            Some(DropReason::Empty)
        } else if filter_noise && is_row_number(trimmed) {
            Some(DropReason::RowNumber)
        } else if dedupe && !seen.insert(trimmed) {
            Some(DropReason::Duplicate)
        } else {
            None
        };

        match reason {
            Some(reason) => cleaned.dropped.push(DroppedToken {
                token: trimmed.to_string(),
                reason,
            }),
            None => cleaned.codes.push(PartCode::new(trimmed)),
        }
    }

    cleaned
}

/// Split free text into tokens on newlines, commas, semicolons, tabs and spaces.
pub fn split_codes(text: &str) -> Vec<String> {
    text.split(|c: char| matches!(c, '\n' | '\r' | ',' | ';' | '\t' | ' '))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Short all-digit tokens, or list markers like `12.`.
fn is_row_number(token: &str) -> bool {
    let digits = token.strip_suffix('.').unwrap_or(token);
    !digits.is_empty()
        && digits.len() <= MAX_ROW_NUMBER_DIGITS
        && digits.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(cleaned: &CleanedCodes) -> Vec<&str> {
        cleaned.codes.iter().map(PartCode::as_str).collect()
    }

    #[test]
    fn row_numbers_and_duplicates_collapse() {
        let cleaned = clean_codes(&["100", "2001234", "2001234", "5"], true, true);
        assert_eq!(codes(&cleaned), vec!["2001234"]);
        assert_eq!(cleaned.dropped.len(), 3);
        assert_eq!(cleaned.dropped[0].reason, DropReason::RowNumber);
        assert_eq!(cleaned.dropped[1].reason, DropReason::Duplicate);
    }

    #[test]
    fn list_markers_are_noise() {
        let cleaned = clean_codes(&["1.", "2001234", "12.", "1234."], true, true);
        assert_eq!(codes(&cleaned), vec!["2001234", "1234."]);
    }

    #[test]
    fn four_digit_codes_survive() {
        let cleaned = clean_codes(&["1000", "0042", "A12"], true, true);
        assert_eq!(codes(&cleaned), vec!["1000", "0042", "A12"]);
    }

    #[test]
    fn filters_can_be_disabled() {
        let cleaned = clean_codes(&["5", "7", "7"], false, false);
        assert_eq!(codes(&cleaned), vec!["5", "7", "7"]);

        let cleaned = clean_codes(&["5", "7", "7"], true, false);
        assert_eq!(codes(&cleaned), vec!["5", "7"]);
    }

    #[test]
    fn whitespace_is_trimmed_and_empties_dropped() {
        let cleaned = clean_codes(&["  2001234 ", "", "   "], true, true);
        assert_eq!(codes(&cleaned), vec!["2001234"]);
        assert!(cleaned.dropped.iter().all(|d| d.reason == DropReason::Empty));
    }

    #[test]
    fn split_handles_mixed_separators() {
        let tokens = split_codes("1\t2001234\n2\t2001235;2001236, 2001237\r\n");
        assert_eq!(tokens, vec!["1", "2001234", "2", "2001235", "2001236", "2001237"]);
    }
}
