use crate::entries::{find_active_toc_path, flatten};
use crate::pdf::toc::import_outline;
use crate::pdf::PdfDocument;
use anyhow::{Context, Result};
use std::path::Path;

pub fn run<P: AsRef<Path>>(path: P, active_page: Option<u32>, json: bool) -> Result<()> {
    let doc = PdfDocument::open(&path)
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let entries = import_outline(&doc.doc)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No bookmarks found.");
        return Ok(());
    }

    for (depth, entry) in flatten(&entries) {
        let indent = "  ".repeat(depth);
        let page_str = entry
            .target
            .page()
            .map(|p| format!(" (p. {})", p))
            .unwrap_or_default();
        println!("{}{}{}", indent, entry.title, page_str);
    }

    if let Some(page) = active_page {
        // bookmarks already point at physical pages
        let path = find_active_toc_path(&entries, i64::from(page), 0, false, 0, 1);
        let titles: Vec<&str> = path.iter().map(|e| e.title.as_str()).collect();
        println!();
        if titles.is_empty() {
            println!("Page {}: before the first bookmark", page);
        } else {
            println!("Page {}: {}", page, titles.join(" > "));
        }
    }

    Ok(())
}
