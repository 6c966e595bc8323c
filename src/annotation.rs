//! Comment annotation parsing
//!
//! Pulls species identifications and acoustic call parameters out of the
//! free-text comments attached to segments, e.g.
//! `"Pipistrelle pipistrellus MOL {sf=45+/-2, durn=5}"`.
//!
//! Everything here is pure: `(text, vocabulary) -> (species, call)`.

use regex::{Regex, RegexBuilder};

use crate::database::models::{Bat, Call, NO_BATS};

/// Words and tags that identify each known species.
pub struct Vocabulary {
    bats: Vec<Bat>,
    entries: Vec<VocabularyEntry>,
    placeholder: usize,
}

struct VocabularyEntry {
    bat: usize,
    tag: String,
    pattern: Regex,
}

#[derive(Debug, Clone, Copy)]
struct TagMatch {
    start: usize,
    end: usize,
    entry: usize,
}

/// Result of parsing one comment.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedComment {
    /// Matching species in order of first mention. Never empty: holds only
    /// the placeholder species when nothing matched.
    pub bats: Vec<Bat>,
    pub call: Option<Call>,
}

impl ParsedComment {
    pub fn bat_names(&self) -> Vec<&str> {
        self.bats.iter().map(|b| b.name.as_str()).collect()
    }
}

/// A tag with letters but no lower-case letters only matches its exact case,
/// so short codes like `MOL` don't fire on ordinary words.
fn is_upper_case_tag(tag: &str) -> bool {
    tag.chars().any(char::is_alphabetic) && !tag.chars().any(char::is_lowercase)
}

impl Vocabulary {
    /// Build from every known species: each species' tags plus its common name.
    pub fn new(bats: &[Bat]) -> Self {
        let mut bats = bats.to_vec();
        let placeholder = match bats.iter().position(|b| b.name == NO_BATS) {
            Some(index) => index,
            None => {
                bats.push(Bat::placeholder());
                bats.len() - 1
            }
        };

        let mut entries = Vec::new();
        for (index, bat) in bats.iter().enumerate() {
            if index == placeholder {
                continue;
            }
            let mut words: Vec<&str> = bat.tags.iter().map(|t| t.trim()).collect();
            words.push(bat.name.trim());
            for word in words.into_iter().filter(|w| !w.is_empty()) {
                if entries
                    .iter()
                    .any(|e: &VocabularyEntry| e.bat == index && e.tag == word)
                {
                    continue;
                }
                match RegexBuilder::new(&regex::escape(word))
                    .case_insensitive(!is_upper_case_tag(word))
                    .build()
                {
                    Ok(pattern) => entries.push(VocabularyEntry {
                        bat: index,
                        tag: word.to_string(),
                        pattern,
                    }),
                    Err(e) => log::warn!("Skipping tag '{}' for {}: {}", word, bat.name, e),
                }
            }
        }

        Self {
            bats,
            entries,
            placeholder,
        }
    }

    pub fn placeholder(&self) -> &Bat {
        &self.bats[self.placeholder]
    }

    /// Non-overlapping tag occurrences in `text`, longest tags winning, in
    /// text order.
    fn find_matches(&self, text: &str) -> Vec<TagMatch> {
        let mut found = Vec::new();
        for (entry_index, entry) in self.entries.iter().enumerate() {
            for m in entry.pattern.find_iter(text) {
                if is_word_boundary(text, m.start(), m.end()) {
                    found.push(TagMatch {
                        start: m.start(),
                        end: m.end(),
                        entry: entry_index,
                    });
                }
            }
        }

        found.sort_by(|a, b| {
            (b.end - b.start)
                .cmp(&(a.end - a.start))
                .then(a.start.cmp(&b.start))
                .then(a.entry.cmp(&b.entry))
        });
        let mut claimed: Vec<TagMatch> = Vec::new();
        for m in found {
            if claimed.iter().all(|c| m.end <= c.start || m.start >= c.end) {
                claimed.push(m);
            }
        }
        claimed.sort_by_key(|m| m.start);
        claimed
    }
}

/// The match must not sit inside a longer word.
fn is_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map_or(false, char::is_alphanumeric) && !after.map_or(false, char::is_alphanumeric)
}

/// Split a comment at the first `{` not escaped as `\{`.
///
/// Returns the descriptive text and, when present, the text inside the
/// braces (up to the closing `}` or the end of the comment).
pub fn split_comment(comment: &str) -> (&str, Option<&str>) {
    let mut escaped = false;
    for (i, c) in comment.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => {
                let rest = &comment[i + 1..];
                let inner = match rest.find('}') {
                    Some(close) => &rest[..close],
                    None => rest,
                };
                return (&comment[..i], Some(inner));
            }
            _ => {}
        }
    }
    (comment, None)
}

/// Species mentioned in the comment plus the call described in its braces.
pub fn parse_comment(comment: &str, vocabulary: &Vocabulary) -> ParsedComment {
    let (descriptive, bracketed) = split_comment(comment);

    let mut bats: Vec<Bat> = Vec::new();
    let mut seen: Vec<usize> = Vec::new();
    for m in vocabulary.find_matches(descriptive) {
        let bat = vocabulary.entries[m.entry].bat;
        if !seen.contains(&bat) {
            seen.push(bat);
            bats.push(vocabulary.bats[bat].clone());
        }
    }
    if bats.is_empty() {
        bats.push(vocabulary.placeholder().clone());
    }

    ParsedComment {
        bats,
        call: bracketed.and_then(parse_call),
    }
}

/// The comment with every matched tag rewritten to the vocabulary's own
/// spelling of it. Text inside braces is left alone.
pub fn normalize_tags(comment: &str, vocabulary: &Vocabulary) -> String {
    let (descriptive, _) = split_comment(comment);
    let mut out = String::with_capacity(comment.len());
    let mut cursor = 0;
    for m in vocabulary.find_matches(descriptive) {
        out.push_str(&comment[cursor..m.start]);
        out.push_str(&vocabulary.entries[m.entry].tag);
        cursor = m.end;
    }
    out.push_str(&comment[cursor..]);
    out
}

/// Parse the `key=value[+/-variation]` list found inside a comment's braces.
///
/// Returns `None` when no recognised parameter is present.
pub fn parse_call(text: &str) -> Option<Call> {
    let mut call = Call::new();
    let mut any = false;

    for item in text.split([',', ';']) {
        let Some((key, value)) = item.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let (mean, variation) = match key.as_str() {
            "type" => {
                call.call_type = Some(value.to_string());
                any = true;
                continue;
            }
            "func" | "function" => {
                call.call_function = Some(value.to_string());
                any = true;
                continue;
            }
            "notes" | "comment" => {
                call.notes = Some(value.to_string());
                any = true;
                continue;
            }
            _ => match parse_mean_variation(value) {
                Some(pair) => (Some(pair.0), Some(pair.1)),
                None => {
                    log::debug!("Unparseable call parameter '{}={}'", key, value);
                    continue;
                }
            },
        };

        match key.as_str() {
            "sf" | "fs" => {
                call.start_frequency = mean;
                call.start_frequency_variation = variation;
            }
            "ef" | "fe" => {
                call.end_frequency = mean;
                call.end_frequency_variation = variation;
            }
            "pf" | "fmaxe" | "fpeak" => {
                call.peak_frequency = mean;
                call.peak_frequency_variation = variation;
            }
            "durn" | "dur" => {
                call.pulse_duration = mean;
                call.pulse_duration_variation = variation;
            }
            "int" | "ipi" => {
                call.pulse_interval = mean;
                call.pulse_interval_variation = variation;
            }
            other => {
                log::debug!("Ignoring unknown call parameter '{}'", other);
                continue;
            }
        }
        any = true;
    }

    any.then_some(call)
}

/// Convert `mean+/-variation`, `mean±variation`, `min-max` or a bare number
/// into `(mean, variation)`. A range is symmetrized around its midpoint.
pub fn parse_mean_variation(text: &str) -> Option<(f64, f64)> {
    let text = text.trim();

    for separator in ["+/-", "±"] {
        if let Some((mean, variation)) = text.split_once(separator) {
            return Some((parse_number(mean)?, parse_number(variation)?.abs()));
        }
    }

    // Skip the first character so a leading minus sign is not a range.
    if let Some(dash) = text.get(1..).and_then(|rest| rest.find('-')) {
        let (low, high) = text.split_at(dash + 1);
        let low = parse_number(low)?;
        let high = parse_number(&high[1..])?;
        return Some(((low + high) / 2.0, (high - low).abs() / 2.0));
    }

    parse_number(text).map(|value| (value, 0.0))
}

/// A number with an optional trailing unit such as `kHz` or `ms`.
fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace())
        .parse()
        .ok()
}
