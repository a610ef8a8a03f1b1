use crate::page_range::expand_page_ranges;
use crate::pdf::PdfDocument;
use crate::render::{
    render_id, PageRasterizer, RenderOutcome, RenderScheduler, ScanRasterizer, SurfaceRenderer,
};
use anyhow::{Context, Result};
use log::warn;
use std::path::Path;
use std::sync::Arc;

/// Write a PNG per page. With `width` every page is scaled to that many pixels,
/// otherwise the scheduler's standard scale is used.
pub async fn run(path: &Path, pages: &str, output_dir: &Path, width: Option<u32>) -> Result<()> {
    let doc = PdfDocument::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let source: Arc<dyn PageRasterizer> = Arc::new(ScanRasterizer::new(doc));
    let page_list = expand_page_ranges(pages, source.page_count())?;
    if page_list.is_empty() {
        anyhow::bail!("No pages specified");
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut failed = 0;
    let results = match width {
        Some(width) => render_thumbnails(&source, &page_list, width).await,
        None => render_scheduled(&source, path, &page_list).await,
    };
    for (page, result) in page_list.iter().zip(results) {
        match result {
            Ok(Some(bitmap)) => {
                let file = output_dir.join(format!("page-{}.png", page));
                bitmap
                    .save(&file)
                    .with_context(|| format!("Failed to write {}", file.display()))?;
                println!("Rendered page {} to {}", page, file.display());
            }
            Ok(None) => {}
            Err(e) => {
                warn!("{}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} page(s) failed to render", failed);
    }
    Ok(())
}

type PageResult = Result<Option<crate::render::Bitmap>, crate::error::RenderError>;

async fn render_scheduled(
    source: &Arc<dyn PageRasterizer>,
    path: &Path,
    pages: &[u32],
) -> Vec<PageResult> {
    let scheduler = RenderScheduler::default();
    let document = path.display().to_string();
    // earlier pages in the list are more urgent
    let tickets: Vec<_> = pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            scheduler.request(&render_id(&document, *page), source.clone(), *page, i as i32)
        })
        .collect();

    let mut results = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        results.push(ticket.wait().await.map(Some));
    }
    results
}

async fn render_thumbnails(
    source: &Arc<dyn PageRasterizer>,
    pages: &[u32],
    width: u32,
) -> Vec<PageResult> {
    let surfaces = SurfaceRenderer::new();
    let mut results = Vec::with_capacity(pages.len());
    for page in pages {
        let surface = format!("thumbnail-{}", page);
        let result = surfaces
            .render(&surface, source.clone(), *page, width)
            .await
            .map(|outcome| match outcome {
                RenderOutcome::Rendered(bitmap) => Some(bitmap),
                RenderOutcome::Cancelled => None,
            });
        results.push(result);
    }
    results
}
