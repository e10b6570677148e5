//! Post-processing for titles returned by the generation service.
//!
//! The response schema already asks for bare titles, but models still prefix them with
//! numbering ("Unit 3: ...") or append difficulty notes ("(Easy)"), so everything is run
//! through the same deterministic cleanup before it is persisted.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static NUMBERED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:\s*(?:unit|game)\s*#?\s*\d+\s*[:.)\-–—]*\s*)+")
        .expect("prefix regex")
});

// list numbering only ("2. ", "3) "); a leading year or count is part of the title
static BARE_NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d{1,2}[.)]\s+").expect("number regex"));

static DIFFICULTY_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[\(\[]\s*(?:easy|medium|hard|beginner|intermediate|advanced|difficulty)\b[^)\]]*[\)\]]\s*$")
        .expect("difficulty regex")
});

static DANGLING_PAREN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*$").expect("paren regex"));

static UNIT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bunit\b\s*\d*").expect("unit token regex"));

const EDGE_PUNCT: &[char] = &[':', '-', '–', '—', '|', ',', ' '];

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip numbering prefixes, trailing difficulty notes and broken parentheticals.
pub fn clean_title(raw: &str) -> String {
    let mut s = collapse_whitespace(raw);
    s = NUMBERED_PREFIX.replace(&s, "").into_owned();
    s = BARE_NUMBER_PREFIX.replace(&s, "").into_owned();
    // a suffix can hide behind another one, e.g. "Loops (Easy) (Beginner)"
    loop {
        let next = DIFFICULTY_SUFFIX.replace(&s, "").into_owned();
        if next == s {
            break;
        }
        s = next;
    }
    s = DANGLING_PAREN.replace(&s, "").into_owned();
    collapse_whitespace(s.trim_matches(EDGE_PUNCT))
}

/// Descriptions only get whitespace and dangling-fragment cleanup.
pub fn clean_description(raw: &str) -> String {
    let s = collapse_whitespace(raw);
    let s = DANGLING_PAREN.replace(&s, "");
    collapse_whitespace(&s)
}

/// Game titles additionally lose any "Unit" token wherever it appears.
pub fn clean_game_title(raw: &str) -> String {
    let s = clean_title(raw);
    let s = UNIT_TOKEN.replace_all(&s, " ");
    collapse_whitespace(collapse_whitespace(&s).trim_matches(EDGE_PUNCT))
}

/// Make titles unique by suffixing repeats with " (Part k)".
pub fn dedupe_titles(titles: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    titles
        .into_iter()
        .map(|t| {
            let count = seen.entry(t.to_lowercase()).or_insert(0);
            *count += 1;
            if *count == 1 {
                t
            } else {
                format!("{} (Part {})", t, count)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_numbered_prefixes() {
        assert_eq!(clean_title("Unit 1: Getting Started"), "Getting Started");
        assert_eq!(clean_title("unit 12 - Ownership"), "Ownership");
        assert_eq!(clean_title("Game 3: Match the Verbs"), "Match the Verbs");
        assert_eq!(clean_title("2. Borrowing Rules"), "Borrowing Rules");
        assert_eq!(clean_title("Unit 3 Game 1: Sums"), "Sums");
        assert_eq!(clean_title("4) Lifetimes"), "Lifetimes");
    }

    #[test]
    fn keeps_numbers_and_words_that_belong_to_the_title() {
        assert_eq!(clean_title("2001: A Space Odyssey"), "2001: A Space Odyssey");
        assert_eq!(clean_title("1984 and Surveillance"), "1984 and Surveillance");
        assert_eq!(clean_title("Chapter 11 Bankruptcy"), "Chapter 11 Bankruptcy");
        assert_eq!(clean_title("Level 3 Spanish Verbs"), "Level 3 Spanish Verbs");
    }

    #[test]
    fn strips_difficulty_suffix_and_dangling_paren() {
        assert_eq!(clean_title("Photosynthesis Basics (Easy)"), "Photosynthesis Basics");
        assert_eq!(clean_title("Cell Walls (Difficulty: hard) "), "Cell Walls");
        assert_eq!(clean_title("Loops (Beginner) (Easy)"), "Loops");
        assert_eq!(clean_title("Mitosis Stages (covering prophase and"), "Mitosis Stages");
    }

    #[test]
    fn keeps_meaningful_parentheticals() {
        assert_eq!(clean_title("Input/Output (I/O) Basics"), "Input/Output (I/O) Basics");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(clean_title("  The   Water\tCycle  "), "The Water Cycle");
        assert_eq!(clean_description("A  short\n\ndescription (with a cut"), "A short description");
    }

    #[test]
    fn game_titles_lose_unit_token() {
        assert_eq!(clean_game_title("Unit 2 Vocabulary Quiz (Medium)"), "Vocabulary Quiz");
        assert_eq!(clean_game_title("Review of Unit 4 Terms"), "Review of Terms");
    }

    #[test]
    fn dedupes_case_insensitively() {
        let out = dedupe_titles(vec!["Intro".into(), "Basics".into(), "intro".into(), "Intro".into()]);
        assert_eq!(out, vec!["Intro", "Basics", "intro (Part 2)", "Intro (Part 3)"]);
    }
}
