//! Branch paths — hierarchical event addressing and visibility.
//!
//! A branch is a `/`-delimited path identifying where in the agent
//! hierarchy an event was produced. Visibility is prefix-based at
//! segment boundaries: an event on branch `root/leaf` is visible to a
//! filter keyed `root/leaf/child`, but not to `root/other`. Parallel
//! sub-branches therefore share no visibility.

/// Separator between branch path segments.
pub const DELIMITER: char = '/';

/// Whether an event produced on `event_branch` is visible to an
/// invocation filtering on `filter_key`.
///
/// True iff either side is empty, the two are equal, or `event_branch`
/// is a proper prefix of `filter_key` ending at a segment boundary.
#[must_use]
pub fn is_visible(event_branch: &str, filter_key: &str) -> bool {
    if event_branch.is_empty() || filter_key.is_empty() {
        return true;
    }
    if event_branch == filter_key {
        return true;
    }
    filter_key.len() > event_branch.len()
        && filter_key.starts_with(event_branch)
        && filter_key.as_bytes()[event_branch.len()] == b'/'
}

/// Append a segment to a branch path. An empty parent yields the bare
/// segment so branches never start with the delimiter.
#[must_use]
pub fn child(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_owned()
    } else {
        format!("{parent}{DELIMITER}{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_event_branch_always_visible() {
        assert!(is_visible("", "anything/at/all"));
        assert!(is_visible("", ""));
    }

    #[test]
    fn empty_filter_admits_everything() {
        assert!(is_visible("root/leaf", ""));
    }

    #[test]
    fn exact_match_visible() {
        assert!(is_visible("root/leaf", "root/leaf"));
    }

    #[test]
    fn descendant_filter_sees_ancestor_events() {
        assert!(is_visible("root/leaf", "root/leaf/child"));
        assert!(is_visible("root", "root/leaf/child"));
    }

    #[test]
    fn sibling_branches_not_visible() {
        assert!(!is_visible("root/leaf", "root/other"));
        assert!(!is_visible("p/c1", "p/c2"));
    }

    #[test]
    fn prefix_must_end_at_segment_boundary() {
        // "root/le" is a string prefix of "root/leaf" but not a path prefix.
        assert!(!is_visible("root/le", "root/leaf"));
    }

    #[test]
    fn ancestor_filter_does_not_see_descendant_events() {
        assert!(!is_visible("root/leaf/child", "root/leaf"));
    }

    #[test]
    fn child_appends_with_delimiter() {
        assert_eq!(child("p", "c1"), "p/c1");
        assert_eq!(child("p/c1", "grand"), "p/c1/grand");
    }

    #[test]
    fn child_of_empty_parent_is_bare_segment() {
        assert_eq!(child("", "root"), "root");
    }
}
