use crate::page_range::page_spans;
use crate::pdf::page_labels::{
    is_default_segments, list_labels, read_segments, suggest_segments_from_toc_ranges,
};
use crate::pdf::PdfDocument;
use anyhow::{Context, Result};
use std::path::Path;

/// Print each page's label, or with `suggest` the segments for a ToC at those pages.
pub fn run<P: AsRef<Path>>(path: P, suggest: Option<&str>, json: bool) -> Result<()> {
    let doc = PdfDocument::open(&path)
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;

    if let Some(ranges) = suggest {
        let spans = page_spans(ranges, doc.page_count())?;
        let segments = suggest_segments_from_toc_ranges(&spans, doc.page_count());
        println!("{}", serde_json::to_string_pretty(&segments)?);
        return Ok(());
    }

    let labels = list_labels(&doc.doc)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&labels)?);
    } else {
        if is_default_segments(&read_segments(&doc.doc)?) {
            println!("(no page labels, pages use their physical numbers)");
        }
        for label in labels {
            println!("{}: {}", label.physical_page, label.label);
        }
    }
    Ok(())
}
