//! crates/twin_data_core/src/chapters.rs
//!
//! Splits the pages of a document into per-chapter text using its table of
//! contents. Titles in real documents vary in punctuation, case and numbering,
//! so matching is approximate: an unrelated line that happens to contain a
//! title can be taken as a boundary, and a heavily reformatted title can be
//! missed.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::{ChapterText, PageText, TocEntry};

const PAGE_MARKER_PREFIX: &str = "--- Página ";

fn enumerator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Roman numeral, arabic number or a single letter, followed by '.' or ')'.
        Regex::new(r"(?i)^\s*(?:[ivxlcdm]+|\d+|[a-z])[.)]\s*").expect("enumerator pattern is valid")
    })
}

/// Lower-cases, drops punctuation and collapses whitespace.
pub fn normalize_title(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Removes a leading "III.", "3." or "a)" style enumerator.
pub fn strip_enumerator(text: &str) -> &str {
    match enumerator_regex().find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}

/// Decides whether `line` is the heading for the chapter called `title`.
pub fn is_chapter_title_match(line: &str, title: &str) -> bool {
    let line_norm = normalize_title(line);
    let title_norm = normalize_title(title);
    if line_norm.is_empty() || title_norm.is_empty() {
        return false;
    }
    if line_norm == title_norm || line_norm.contains(&title_norm) || title_norm.contains(&line_norm) {
        return true;
    }

    let line_bare = normalize_title(strip_enumerator(line));
    !line_bare.is_empty() && line_bare == normalize_title(strip_enumerator(title))
}

/// A rough token count for budgeting model input.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

fn is_page_marker(line: &str) -> bool {
    line.starts_with(PAGE_MARKER_PREFIX)
}

/// Cuts `content` down to the lines between the chapter heading and the next
/// chapter's heading. Without a matching heading the whole content is kept.
pub fn extract_chapter_text(content: &str, title: &str, next_title: Option<&str>) -> String {
    let lines: Vec<&str> = content.lines().collect();

    let start = lines
        .iter()
        .position(|l| !is_page_marker(l) && is_chapter_title_match(l, title))
        .unwrap_or(0);

    let end = match next_title {
        Some(next) => lines
            .iter()
            .enumerate()
            .skip(start + 1)
            .find(|(_, l)| !is_page_marker(l) && is_chapter_title_match(l, next))
            .map(|(i, _)| i)
            .unwrap_or(lines.len()),
        None => lines.len(),
    };

    lines[start..end].join("\n")
}

/// Attributes page text to every chapter of the table of contents.
///
/// A chapter runs from its start page up to the page before the next chapter
/// starts; the last chapter runs to its recorded end page (if any) or the last
/// page present.
pub fn extract_chapters(pages: &[PageText], toc: &[TocEntry]) -> Vec<ChapterText> {
    let Some(max_page) = pages.iter().map(|p| p.page_number).max() else {
        return Vec::new();
    };

    let mut sorted_pages: Vec<&PageText> = pages.iter().collect();
    sorted_pages.sort_by_key(|p| p.page_number);

    let mut entries: Vec<&TocEntry> = toc.iter().filter(|e| !e.title.trim().is_empty()).collect();
    entries.sort_by_key(|e| e.start_page);

    let mut chapters = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let start = entry.start_page;
        if start > max_page {
            continue;
        }
        let next = entries.get(i + 1);
        let end = match next {
            Some(next) => next.start_page.saturating_sub(1).min(max_page).max(start),
            None => entry
                .end_page
                .map(|e| e.min(max_page))
                .filter(|e| *e >= start)
                .unwrap_or(max_page),
        };

        let mut content = String::new();
        for page in sorted_pages.iter().filter(|p| p.page_number >= start && p.page_number <= end) {
            content.push_str(&format!("{}{} ---\n", PAGE_MARKER_PREFIX, page.page_number));
            for line in &page.lines {
                content.push_str(line);
                content.push('\n');
            }
        }

        let full_text = extract_chapter_text(&content, &entry.title, next.map(|n| n.title.as_str()));
        chapters.push(ChapterText {
            title: entry.title.clone(),
            page_from: start,
            page_to: end,
            total_tokens: estimate_tokens(&full_text),
            full_text,
        });
    }
    chapters
}
