use crate::pdf::text::{detect_toc_pages, MAX_SCAN_PAGES};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run<P: AsRef<Path>>(path: P) -> Result<()> {
    let bytes = std::fs::read(&path)
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    let pages = detect_toc_pages(&bytes)?;

    if pages.is_empty() {
        println!(
            "No table of contents detected in the first {} pages.",
            MAX_SCAN_PAGES
        );
        return Ok(());
    }

    let list: Vec<String> = pages.iter().map(u32::to_string).collect();
    println!("Possible ToC pages: {}", list.join(", "));
    Ok(())
}
