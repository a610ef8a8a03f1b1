use std::sync::OnceLock;

use log::debug;
use regex::Regex;

use crate::error::{Result, TocError};

/// Only the front of a document is scanned for ToC pages.
pub const MAX_SCAN_PAGES: usize = 20;

const TOC_KEYWORDS: [&str; 4] = ["contents", "table of contents", "目录", "目次"];

/// Lines ending in a page number ("Intro ...... 12") that mark a page without a keyword.
const MIN_LEADER_LINES: usize = 5;

fn leader_line() -> Option<&'static Regex> {
    static LEADER: OnceLock<Option<Regex>> = OnceLock::new();
    LEADER
        .get_or_init(|| Regex::new(r".*\s+(\.{3,}|_{3,}|-{3,})\s*\d+$|.*\s+\d+$").ok())
        .as_ref()
}

/// Text of each page, in order.
pub fn extract_text_pages(pdf_bytes: &[u8]) -> Result<Vec<String>> {
    pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        .map_err(|e| TocError::input(format!("Failed to extract text from PDF: {}", e)))
}

/// Whether a page's text looks like part of a table of contents.
pub fn looks_like_toc_page(text: &str) -> bool {
    let lower = text.to_lowercase();
    if TOC_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    let Some(leader) = leader_line() else {
        return false;
    };
    let matches = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && leader.is_match(line))
        .count();
    matches >= MIN_LEADER_LINES
}

/// 1-based numbers of the pages among the first twenty that look like a ToC.
pub fn detect_toc_pages(pdf_bytes: &[u8]) -> Result<Vec<u32>> {
    let pages = extract_text_pages(pdf_bytes)?;
    let detected: Vec<u32> = pages
        .iter()
        .take(MAX_SCAN_PAGES)
        .enumerate()
        .filter(|(_, text)| looks_like_toc_page(text))
        .map(|(i, _)| i as u32 + 1)
        .collect();
    debug!(
        "Scanned {} page(s), {} look like a ToC",
        pages.len().min(MAX_SCAN_PAGES),
        detected.len()
    );
    Ok(detected)
}
