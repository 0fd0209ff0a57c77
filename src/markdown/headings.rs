use super::Heading;
use crate::slug::SlugRegistry;

/// Scan raw Markdown for ATX headings (`# Title` through `###### Title`) and
/// give each one an id that is unique within this document.
///
/// This is a line-based pass: it does not need a full parse, but it does skip
/// over fenced code blocks so that shell comments aren't mistaken for
/// headings. Setext (underlined) headings are not recognized.
pub fn extract_headings(source: &str) -> Vec<Heading> {
    let mut fence: Option<Fence> = None;
    let mut found = vec![];

    for line in source.lines() {
        if let Some(open) = &fence {
            if open.is_closed_by(line) {
                fence = None;
            }
            continue;
        }
        if let Some(opened) = Fence::open(line) {
            fence = Some(opened);
            continue;
        }
        if let Some((level, text)) = atx_heading(line) {
            let (text, id) = split_attributes(text);
            found.push((level, text, id));
        }
    }

    // Explicit ids win, wherever they appear.
    let mut slugs = SlugRegistry::new();
    for (_, _, id) in &found {
        if let Some(id) = id {
            slugs.reserve(id);
        }
    }
    found
        .into_iter()
        .map(|(level, text, id)| Heading {
            level,
            id: id.map_or_else(|| slugs.slug(text), str::to_string),
            text: text.to_string(),
        })
        .collect()
}

/// Split a trailing `{#id .class}` attribute block off heading text,
/// returning the remaining text and the id, if the block names one.
fn split_attributes(text: &str) -> (&str, Option<&str>) {
    let Some(inner) = text.strip_suffix('}') else {
        return (text, None);
    };
    let Some(open) = inner.rfind('{') else {
        return (text, None);
    };
    let id = inner[open + 1..]
        .split_whitespace()
        .find_map(|attr| attr.strip_prefix('#'))
        .filter(|id| !id.is_empty());
    (inner[..open].trim_end(), id)
}

/// Strip up to three spaces of indentation, as CommonMark allows for block
/// markers. Returns `None` for anything indented further (a code block).
fn strip_indent(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches(' ');
    if line.len() - rest.len() > 3 {
        None
    } else {
        Some(rest)
    }
}

/// Parse an ATX heading line into its level and trimmed text.
fn atx_heading(line: &str) -> Option<(u8, &str)> {
    let rest = strip_indent(line)?;
    let level = rest.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }

    let after = &rest[level..];
    if !after.is_empty() && !after.starts_with([' ', '\t']) {
        return None; // `#hashtag`, not a heading.
    }

    Some((level as u8, strip_closing_hashes(after.trim())))
}

/// Drop an optional closing sequence like the ` ##` in `## Title ##`. The
/// run only counts if it's preceded by whitespace (or is the whole text).
fn strip_closing_hashes(text: &str) -> &str {
    let without = text.trim_end_matches('#');
    if without.len() == text.len() {
        text
    } else if without.is_empty() {
        ""
    } else if without.ends_with([' ', '\t']) {
        without.trim_end()
    } else {
        text
    }
}

struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn open(line: &str) -> Option<Self> {
        let rest = strip_indent(line)?;
        let marker = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = rest.chars().take_while(|c| *c == marker).count();
        if len < 3 {
            return None;
        }
        // Backtick fences can't have backticks in their info string.
        if marker == '`' && rest[len..].contains('`') {
            return None;
        }
        Some(Self { marker, len })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let Some(rest) = strip_indent(line) else {
            return false;
        };
        let len = rest.chars().take_while(|c| *c == self.marker).count();
        len >= self.len && rest[len..].trim().is_empty()
    }
}
