use regex::Regex;
use tracing::warn;

use chorus_core::messages::SPEAKER_SEPARATOR;

/// Removes speaker labels a persona echoes at the start of its reply,
/// e.g. `"Alice：Hello"` becomes `"Hello"`.
///
/// Built once per turn from the display names of everyone in the group.
/// Matching is case-insensitive and repeats until no label is left, so
/// applying it to already stripped text changes nothing.
#[derive(Debug)]
pub struct NamePrefixStripper {
    pattern: Option<Regex>,
}

impl NamePrefixStripper {
    pub fn new<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut alternatives: Vec<String> = names
            .into_iter()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Self { pattern: None };
        }
        alternatives.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        alternatives.dedup();

        let source = format!(
            "^(?i:{}){}",
            alternatives.join("|"),
            regex::escape(SPEAKER_SEPARATOR)
        );
        let pattern = match Regex::new(&source) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(error = %e, "name prefix pattern rejected, prefixes will be kept");
                None
            }
        };
        Self { pattern }
    }

    pub fn strip<'t>(&self, text: &'t str) -> &'t str {
        let Some(pattern) = &self.pattern else {
            return text;
        };
        let mut rest = text;
        while let Some(m) = pattern.find(rest) {
            rest = &rest[m.end()..];
        }
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripper() -> NamePrefixStripper {
        NamePrefixStripper::new(["Alice", "Bob", "user"])
    }

    #[test]
    fn strips_leading_label() {
        assert_eq!(stripper().strip("Alice：Hello"), "Hello");
        assert_eq!(stripper().strip("user：hi"), "hi");
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(stripper().strip("ALICE：Hello"), "Hello");
        assert_eq!(stripper().strip("bob：yo"), "yo");
    }

    #[test]
    fn repeated_labels_are_all_removed() {
        let s = stripper();
        let once = s.strip("Bob：Alice：Hello");
        assert_eq!(once, "Hello");
        assert_eq!(s.strip(once), once);
    }

    #[test]
    fn only_leading_labels() {
        assert_eq!(stripper().strip("Hi Alice：there"), "Hi Alice：there");
        assert_eq!(stripper().strip("Alice: ascii colon"), "Alice: ascii colon");
    }

    #[test]
    fn unknown_names_kept() {
        assert_eq!(stripper().strip("Carol：hey"), "Carol：hey");
    }

    #[test]
    fn regex_metacharacters_in_names() {
        let s = NamePrefixStripper::new(["A.I. (beta)"]);
        assert_eq!(s.strip("A.I. (beta)：ok"), "ok");
        assert_eq!(s.strip("AxI. (beta)：ok"), "AxI. (beta)：ok");
    }

    #[test]
    fn no_names_is_identity() {
        let s = NamePrefixStripper::new(std::iter::empty());
        assert_eq!(s.strip("Alice：Hello"), "Alice：Hello");
    }
}
