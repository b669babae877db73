//! Fuzzy name matching for course and group titles typed into rosters.

pub trait NameMatcher {
    fn matches(&self, input: &str, candidate: &str) -> bool;
}

/// Accepts when either normalized name contains the other.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainmentMatcher;

const STRIPPED: &[char] = &[
    '-', '_', '/', '|', '\'', '\u{2019}', '\u{2018}', '\u{02BB}', '\u{02BC}', '`',
];

pub fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

impl NameMatcher for ContainmentMatcher {
    fn matches(&self, input: &str, candidate: &str) -> bool {
        let a = normalize_name(input);
        if a.is_empty() {
            return false;
        }
        let b = normalize_name(candidate);
        a.contains(&b) || b.contains(&a)
    }
}

/// First candidate the matcher accepts, in iteration order.
pub fn find_first<'a, T, I, F>(
    matcher: &dyn NameMatcher,
    input: &str,
    candidates: I,
    name: F,
) -> Option<&'a T>
where
    I: IntoIterator<Item = &'a T>,
    F: Fn(&T) -> &str,
    T: 'a,
{
    candidates
        .into_iter()
        .find(|c| matcher.matches(input, name(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separators_and_case_are_ignored() {
        let m = ContainmentMatcher;
        assert!(m.matches("Web Dev", "web-dev"));
        assert!(m.matches("Web Dev", "WEBDEV"));
        assert!(m.matches("data_science", "Data / Science"));
        assert!(!m.matches("Web Dev", "Mobile"));
    }

    #[test]
    fn apostrophe_variants_collapse() {
        let m = ContainmentMatcher;
        assert!(m.matches("O'zbek tili", "O\u{2018}zbek tili"));
        assert!(m.matches("Ma\u{02BB}rifat", "Ma`rifat"));
        assert_eq!(normalize_name("Noma\u{2019}lum"), "nomalum");
    }

    #[test]
    fn containment_goes_both_ways() {
        let m = ContainmentMatcher;
        assert!(m.matches("Web", "Web Development"));
        assert!(m.matches("Web Development 2024", "web development"));
    }

    #[test]
    fn blank_input_never_matches() {
        let m = ContainmentMatcher;
        assert!(!m.matches("", "anything"));
        assert!(!m.matches(" - _ ", "anything"));
        assert!(!m.matches("  ", ""));
    }

    #[test]
    fn first_accepted_candidate_wins() {
        let m = ContainmentMatcher;
        let names = vec!["Web Development".to_string(), "Web".to_string()];
        let hit = find_first(&m, "web", &names, |s| s.as_str());
        assert_eq!(hit.map(String::as_str), Some("Web Development"));
        assert!(find_first(&m, "python", &names, |s| s.as_str()).is_none());
    }
}
