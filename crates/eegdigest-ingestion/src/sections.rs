//! Heading-based section slicing of extracted paper text.
//!
//! Pure functions only: the same input always yields the same slices, and every
//! slice is a (possibly empty) string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const MAX_HEADING_CHARS: usize = 120;
const TAIL_MARKER: &str = "\n\n[...TAIL_EXCERPT...]\n\n";
const TRUNCATION_MARKER: &str = "\n\n[...TRUNCATED...]\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Abstract,
    Introduction,
    Methods,
    Results,
    Conclusion,
}

impl Section {
    const ALL: [Section; 5] = [
        Section::Abstract,
        Section::Introduction,
        Section::Methods,
        Section::Results,
        Section::Conclusion,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Sections whose heading may close this one.
    fn successors(self) -> &'static [Section] {
        match self {
            Section::Abstract     => &[Section::Introduction, Section::Methods, Section::Results, Section::Conclusion],
            Section::Introduction => &[Section::Methods, Section::Results, Section::Conclusion],
            Section::Methods      => &[Section::Results, Section::Conclusion],
            Section::Results      => &[Section::Conclusion],
            Section::Conclusion   => &[],
        }
    }

    fn max_chars(self) -> usize {
        match self {
            Section::Abstract     => 5_000,
            Section::Introduction => 9_000,
            Section::Methods      => 12_000,
            Section::Results      => 12_000,
            Section::Conclusion   => 7_000,
        }
    }

    fn patterns(self) -> &'static [Regex] {
        static PATTERNS: OnceLock<Vec<Vec<Regex>>> = OnceLock::new();
        let all = PATTERNS.get_or_init(|| {
            let sources: [&[&str]; 5] = [
                &[r"(?i)^\s*abstract\s*$"],
                &[
                    r"(?i)^\s*introduction\s*$",
                    r"(?i)^\s*\d+(\.\d+)*\s+introduction\s*$",
                ],
                &[
                    r"(?i)^\s*(methods|methodology|approach|materials and methods)\s*$",
                    r"(?i)^\s*\d+(\.\d+)*\s+(methods|methodology|approach)\s*$",
                ],
                &[
                    r"(?i)^\s*(results|experiments|evaluation)\s*$",
                    r"(?i)^\s*\d+(\.\d+)*\s+(results|experiments|evaluation)\s*$",
                ],
                &[
                    r"(?i)^\s*(conclusion|conclusions|discussion|concluding remarks)\s*$",
                    r"(?i)^\s*\d+(\.\d+)*\s+(conclusion|conclusions|discussion)\s*$",
                ],
            ];
            sources
                .iter()
                .map(|group| group.iter().map(|p| Regex::new(p).expect("valid heading regex")).collect())
                .collect()
        });
        &all[self.index()]
    }

    fn matches(self, line: &str) -> bool {
        let normalized = line.trim().to_lowercase();
        self.patterns().iter().any(|re| re.is_match(&normalized))
    }
}

/// Head and tail character budgets for the excerpt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceLimits {
    pub head_chars: usize,
    pub tail_chars: usize,
}

impl Default for SliceLimits {
    fn default() -> Self {
        Self { head_chars: 80_000, tail_chars: 20_000 }
    }
}

/// Section slices of one document. All six fields are always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulltextSlices {
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub introduction: String,
    pub methods: String,
    pub results: String,
    pub conclusion: String,
    pub excerpt: String,
}

fn whitespace_before_newline() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+\n").expect("valid regex"))
}

fn blank_line_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Normalize line endings and collapse runs of blank lines.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let stripped = whitespace_before_newline().replace_all(&unified, "\n");
    blank_line_runs().replace_all(&stripped, "\n\n").into_owned()
}

/// Characters that end a line besides `\n`: vertical tab, form feed, the
/// file/group/record separators, NEL and the Unicode line/paragraph separators.
fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\u{0b}' | '\u{0c}' | '\u{1c}' | '\u{1d}' | '\u{1e}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.split(is_line_break).collect();
    if text.ends_with(is_line_break) {
        lines.pop();
    }
    lines
}

/// First `n` characters of `s`.
pub(crate) fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `n` characters of `s`.
fn last_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Line index of the first heading of each section.
fn find_headings(lines: &[&str]) -> [Option<usize>; 5] {
    let mut found = [None; 5];
    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
            continue;
        }
        for section in Section::ALL {
            if found[section.index()].is_none() && section.matches(line) {
                found[section.index()] = Some(idx);
                break;
            }
        }
    }
    found
}

fn extract_between(lines: &[&str], headings: &[Option<usize>; 5], section: Section) -> String {
    let Some(heading) = headings[section.index()] else {
        return String::new();
    };
    let end = section
        .successors()
        .iter()
        .filter_map(|s| headings[s.index()])
        .filter(|&idx| idx > heading)
        .min()
        .unwrap_or(lines.len());
    let chunk = lines[heading + 1..end].join("\n");
    take_chars(chunk.trim(), section.max_chars()).to_string()
}

/// Split raw document text into section slices plus a bounded excerpt.
pub fn slice_paper_text(text: &str, limits: SliceLimits) -> FulltextSlices {
    let normalized = normalize_text(text);
    let lines = split_lines(&normalized);
    let headings = find_headings(&lines);

    let mut excerpt = take_chars(&normalized, limits.head_chars).to_string();
    if limits.tail_chars > 0 && normalized.chars().count() > limits.head_chars + limits.tail_chars {
        excerpt.push_str(TAIL_MARKER);
        excerpt.push_str(last_chars(&normalized, limits.tail_chars));
    }

    FulltextSlices {
        abstract_text: extract_between(&lines, &headings, Section::Abstract),
        introduction: extract_between(&lines, &headings, Section::Introduction),
        methods: extract_between(&lines, &headings, Section::Methods),
        results: extract_between(&lines, &headings, Section::Results),
        conclusion: extract_between(&lines, &headings, Section::Conclusion),
        excerpt: excerpt.trim().to_string(),
    }
}

/// `text` unchanged if it fits in `head + tail` characters, else head and tail
/// joined by a truncation marker.
pub fn bounded_text(text: &str, head_chars: usize, tail_chars: usize) -> String {
    if text.chars().count() <= head_chars + tail_chars {
        return text.to_string();
    }
    format!(
        "{}{}{}",
        take_chars(text, head_chars),
        TRUNCATION_MARKER,
        last_chars(text, tail_chars)
    )
}
