//! Fuzzy sheet-name lookup
//!
//! Template sheet names drift (trailing notes, abbreviations), so a requested
//! name is matched in three tiers, first match wins:
//!
//! 1. exact equality
//! 2. the first available name that contains the requested name
//! 3. the first available name that is contained in the requested name
//!
//! Within a tier the order of `available` decides. The tier order matters:
//! swapping 2 and 3 changes the answer for ambiguous inputs.

/// Pick the sheet that best matches `requested`, or `None` when nothing does
pub fn locate<'a, S: AsRef<str>>(requested: &str, available: &'a [S]) -> Option<&'a str> {
    // An empty name is a substring of everything
    if requested.is_empty() {
        return None;
    }

    let names = || available.iter().map(AsRef::<str>::as_ref);

    names()
        .find(|name| *name == requested)
        .or_else(|| names().find(|name| name.contains(requested)))
        .or_else(|| names().find(|name| !name.is_empty() && requested.contains(name)))
}

/// Try each candidate name in turn and return the first sheet any of them locates
pub fn locate_any<'a, C, S>(candidates: &[C], available: &'a [S]) -> Option<&'a str>
where
    C: AsRef<str>,
    S: AsRef<str>,
{
    candidates
        .iter()
        .find_map(|candidate| locate(candidate.as_ref(), available))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let sheets = ["Sheet1", "Monthly Report (Final)"];
        assert_eq!(locate("Sheet1", &sheets), Some("Sheet1"));
    }

    #[test]
    fn test_exact_match_beats_containment() {
        // "Sheet1 (old)" contains "Sheet1" and comes first, but the exact match wins
        let sheets = ["Sheet1 (old)", "Sheet1"];
        assert_eq!(locate("Sheet1", &sheets), Some("Sheet1"));
    }

    #[test]
    fn test_available_contains_requested() {
        let sheets = ["Monthly Report (Final)"];
        assert_eq!(locate("Monthly Report", &sheets), Some("Monthly Report (Final)"));
    }

    #[test]
    fn test_requested_contains_available() {
        let sheets = ["Jan"];
        assert_eq!(locate("Jan Summary", &sheets), Some("Jan"));
    }

    #[test]
    fn test_not_found() {
        let sheets = ["Feb"];
        assert_eq!(locate("Jan", &sheets), None);
        assert_eq!(locate("Jan", &[] as &[&str]), None);
    }

    #[test]
    fn test_tier_two_runs_before_tier_three() {
        // "Jan" is contained in the request (tier 3) and "Jan Summary 2024" contains
        // the request (tier 2); tier 2 must win even though "Jan" is listed first.
        let sheets = ["Jan", "Jan Summary 2024"];
        assert_eq!(locate("Jan Summary", &sheets), Some("Jan Summary 2024"));
    }

    #[test]
    fn test_first_match_in_given_order() {
        let sheets = ["Report B", "Report A"];
        assert_eq!(locate("Report", &sheets), Some("Report B"));
        let reversed = ["Report A", "Report B"];
        assert_eq!(locate("Report", &reversed), Some("Report A"));
    }

    #[test]
    fn test_empty_request_never_matches() {
        let sheets = ["Sheet1"];
        assert_eq!(locate("", &sheets), None);
    }

    #[test]
    fn test_works_with_owned_names() {
        let sheets = vec!["名簿リスト".to_string(), "集計".to_string()];
        assert_eq!(locate("リスト", &sheets), Some("名簿リスト"));
    }

    #[test]
    fn test_locate_any_uses_candidate_order() {
        let sheets = ["List", "リスト"];
        assert_eq!(locate_any(&["リスト", "List"], &sheets), Some("リスト"));
        let english_only = ["Member List"];
        assert_eq!(locate_any(&["リスト", "List"], &english_only), Some("Member List"));
        assert_eq!(locate_any(&["リスト", "List"], &["Data"]), None);
    }
}
