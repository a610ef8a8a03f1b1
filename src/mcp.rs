use anyhow::Result;
use rmcp::{
    ServerHandler, ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{ServerCapabilities, ServerInfo},
    schemars, tool, tool_router,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::commands::generate::{generate_file, load_config, write_atomically, GenerateOptions};
use crate::entries::flatten;
use crate::page_range::page_spans;
use crate::pdf::page_labels::{list_labels, suggest_segments_from_toc_ranges};
use crate::pdf::text::detect_toc_pages;
use crate::pdf::toc::import_outline;
use crate::pdf::PdfDocument;
use crate::render::{
    render_id, Bitmap, PageRasterizer, RenderOutcome, RenderScheduler, ScanRasterizer,
    SurfaceRenderer,
};

// Request structs for tools

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PathRequest {
    #[schemars(description = "Path to the PDF file")]
    pub path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SuggestLabelsRequest {
    #[schemars(description = "Path to the PDF file")]
    pub path: String,
    #[schemars(description = "Pages holding the table of contents (e.g., '3-4')")]
    pub toc_pages: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GenerateRequest {
    #[schemars(description = "Path to the source PDF file")]
    pub path: String,
    #[schemars(description = "Output file path")]
    pub output: String,
    #[schemars(
        description = "JSON entries file, nested {title, to, children} or flat {title, level, page}. Defaults to the document's bookmarks"
    )]
    #[serde(default)]
    pub entries: Option<String>,
    #[schemars(description = "JSON configuration file")]
    #[serde(default)]
    pub config: Option<String>,
    #[schemars(description = "Page before which ToC pages are inserted (default: 2)")]
    #[serde(default)]
    pub insert_at: Option<u32>,
    #[schemars(description = "Added to every entry's page number (default: 0)")]
    #[serde(default)]
    pub offset: Option<i64>,
    #[schemars(description = "Only write bookmarks, without ToC pages (default: false)")]
    #[serde(default)]
    pub outline_only: bool,
    #[schemars(description = "Scale ToC font sizes to the page width (default: false)")]
    #[serde(default)]
    pub auto_font_size: bool,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RenderPageRequest {
    #[schemars(description = "Path to the PDF file")]
    pub path: String,
    #[schemars(description = "Page number (1-indexed)")]
    pub page: u32,
    #[schemars(description = "PNG file to write")]
    pub output: String,
    #[schemars(
        description = "Width in pixels. When set the page is drawn onto `surface` and replaces any render still running there; otherwise the shared cache is used"
    )]
    #[serde(default)]
    pub width: Option<u32>,
    #[schemars(description = "Surface name for width-scaled renders (default: 'preview')")]
    #[serde(default)]
    pub surface: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SurfaceRequest {
    #[schemars(description = "Surface name")]
    pub surface: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct RenderStatusRequest {
    #[schemars(description = "Also report whether this surface has a render running")]
    #[serde(default)]
    pub surface: Option<String>,
}

const DEFAULT_SURFACE: &str = "preview";

#[derive(Clone)]
pub struct TocServer {
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
    renders: RenderScheduler,
    surfaces: SurfaceRenderer,
}

impl TocServer {
    pub fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
            renders: RenderScheduler::default(),
            surfaces: SurfaceRenderer::new(),
        }
    }

    /// The rendered page and whether it came from the cache; `None` when superseded.
    async fn render_page(
        &self,
        req: &RenderPageRequest,
    ) -> std::result::Result<Option<(Bitmap, bool)>, String> {
        let open = || -> std::result::Result<Arc<dyn PageRasterizer>, String> {
            let doc = PdfDocument::open(&req.path).map_err(|e| e.to_string())?;
            Ok(Arc::new(ScanRasterizer::new(doc)))
        };

        if let Some(width) = req.width {
            let surface = req.surface.as_deref().unwrap_or(DEFAULT_SURFACE);
            return match self.surfaces.render(surface, open()?, req.page, width).await {
                Ok(RenderOutcome::Rendered(bitmap)) => Ok(Some((bitmap, false))),
                Ok(RenderOutcome::Cancelled) => Ok(None),
                Err(e) => Err(e.to_string()),
            };
        }

        let id = render_id(&req.path, req.page);
        if let Some(bitmap) = self.renders.cached(&id) {
            return Ok(Some((bitmap, true)));
        }
        self.renders
            .submit(&id, open()?, req.page, 0)
            .await
            .map(|bitmap| Some((bitmap, false)))
            .map_err(|e| e.to_string())
    }
}

impl Default for TocServer {
    fn default() -> Self {
        Self::new()
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Error: {}", e))
}

#[tool_router]
impl TocServer {
    #[tool(description = "Get the bookmark tree of a PDF as a flat list with nesting levels")]
    fn pdf_outline(&self, Parameters(PathRequest { path }): Parameters<PathRequest>) -> String {
        let doc = match PdfDocument::open(&path) {
            Ok(d) => d,
            Err(e) => return format!("Error: {}", e),
        };
        match import_outline(&doc.doc) {
            Ok(entries) => {
                let result: Vec<OutlineEntryResult> = flatten(&entries)
                    .into_iter()
                    .map(|(depth, e)| OutlineEntryResult {
                        title: e.title.clone(),
                        page: e.target.page(),
                        level: depth as u32 + 1,
                    })
                    .collect();
                to_json(&result)
            }
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Get the mapping between physical page numbers (1-indexed) and logical page labels")]
    fn pdf_page_labels(&self, Parameters(PathRequest { path }): Parameters<PathRequest>) -> String {
        let doc = match PdfDocument::open(&path) {
            Ok(d) => d,
            Err(e) => return format!("Error: {}", e),
        };
        match list_labels(&doc.doc) {
            Ok(labels) => to_json(&labels),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Suggest page label segments for a document whose table of contents sits on the given pages")]
    fn pdf_suggest_page_labels(&self, Parameters(req): Parameters<SuggestLabelsRequest>) -> String {
        let doc = match PdfDocument::open(&req.path) {
            Ok(d) => d,
            Err(e) => return format!("Error: {}", e),
        };
        match page_spans(&req.toc_pages, doc.page_count()) {
            Ok(spans) => to_json(&suggest_segments_from_toc_ranges(&spans, doc.page_count())),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Find pages among the first 20 that look like a printed table of contents")]
    fn pdf_detect_toc(&self, Parameters(PathRequest { path }): Parameters<PathRequest>) -> String {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => return format!("Error: {}", e),
        };
        match detect_toc_pages(&bytes) {
            Ok(pages) => to_json(&DetectResult { pages }),
            Err(e) => format!("Error: {}", e),
        }
    }

    #[tool(description = "Insert table of contents pages with clickable links, bookmarks and page labels, saving the result to a new file")]
    async fn pdf_generate_toc(&self, Parameters(req): Parameters<GenerateRequest>) -> String {
        let options = GenerateOptions {
            config: req.config.map(PathBuf::from),
            insert_at: req.insert_at,
            offset: req.offset,
            font: None,
            no_pages: req.outline_only,
            auto_font_size: req.auto_font_size,
        };
        let config = match load_config(&options) {
            Ok(c) => c,
            Err(e) => return format!("Error: {:#}", e),
        };

        let entries = req.entries.map(PathBuf::from);
        let result = match generate_file(Path::new(&req.path), entries.as_deref(), config).await {
            Ok(r) => r,
            Err(e) => return format!("Error: {:#}", e),
        };
        if let Err(e) = write_atomically(Path::new(&req.output), &result.bytes) {
            return format!("Error: {:#}", e);
        }

        to_json(&GenerateResult {
            output_path: req.output,
            toc_page_count: result.toc_page_count,
            annotation_count: result.annotation_count,
            outline_written: result.outline_written,
        })
    }

    #[tool(description = "Render one page to PNG. Without a width, pages are rendered at 2x scale through a shared cache; with a width, onto a named surface")]
    async fn pdf_render_page(&self, Parameters(req): Parameters<RenderPageRequest>) -> String {
        let (bitmap, cached) = match self.render_page(&req).await {
            Ok(Some(rendered)) => rendered,
            Ok(None) => return "Cancelled: a newer render replaced this one".to_string(),
            Err(e) => return format!("Error: {}", e),
        };
        if let Err(e) = bitmap.save(&req.output) {
            return format!("Error: {}", e);
        }
        to_json(&RenderResult {
            output_path: req.output,
            width: bitmap.width(),
            height: bitmap.height(),
            cached,
        })
    }

    #[tool(description = "Count renders running and queued, optionally checking one surface")]
    fn pdf_render_status(&self, Parameters(req): Parameters<RenderStatusRequest>) -> String {
        to_json(&RenderStatusResult {
            active: self.renders.active_count(),
            queued: self.renders.queued_count(),
            surface_busy: req.surface.map(|surface| self.surfaces.is_busy(&surface)),
        })
    }

    #[tool(description = "Cancel the render running on a surface")]
    async fn pdf_cancel_render(
        &self,
        Parameters(SurfaceRequest { surface }): Parameters<SurfaceRequest>,
    ) -> String {
        let was_busy = self.surfaces.is_busy(&surface);
        self.surfaces.cancel(&surface).await;
        to_json(&CancelResult {
            surface,
            cancelled: was_busy,
        })
    }

    #[tool(description = "Drop queued page renders and every cached page, e.g. after a PDF changed on disk")]
    fn pdf_clear_render_cache(&self) -> String {
        self.renders.clear();
        "Render cache cleared".to_string()
    }
}

// Result types for MCP tools

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct OutlineEntryResult {
    pub title: String,
    pub page: Option<u32>,
    pub level: u32,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DetectResult {
    pub pages: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RenderResult {
    pub output_path: String,
    pub width: u32,
    pub height: u32,
    pub cached: bool,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RenderStatusResult {
    pub active: usize,
    pub queued: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_busy: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CancelResult {
    pub surface: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct GenerateResult {
    pub output_path: String,
    pub toc_page_count: u32,
    pub annotation_count: usize,
    pub outline_written: bool,
}

impl ServerHandler for TocServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Table of contents tools for PDFs. Use pdf_outline to read bookmarks, \
                 pdf_detect_toc to find printed ToC pages, pdf_page_labels and \
                 pdf_suggest_page_labels for page numbering, pdf_generate_toc to insert \
                 a linked table of contents, and pdf_render_page to preview pages."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub async fn run_server() -> Result<()> {
    let server = TocServer::new();

    // Serve using stdin/stdout as a tuple
    let service = server.serve((tokio::io::stdin(), tokio::io::stdout())).await?;

    service.waiting().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::testing::sample_pdf_bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_generate_then_read_outline() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let entries = dir.path().join("entries.json");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, sample_pdf_bytes(5)).unwrap();
        std::fs::write(
            &entries,
            r#"[{"title": "One", "to": 1}, {"title": "Two", "to": 3, "children": [{"title": "Two A", "to": 4}]}]"#,
        )
        .unwrap();

        let server = TocServer::new();
        let response = server
            .pdf_generate_toc(Parameters(GenerateRequest {
                path: input.display().to_string(),
                output: output.display().to_string(),
                entries: Some(entries.display().to_string()),
                config: None,
                insert_at: None,
                offset: None,
                outline_only: false,
                auto_font_size: false,
            }))
            .await;
        let result: GenerateResult = serde_json::from_str(&response).unwrap();
        assert_eq!(result.toc_page_count, 1);
        assert_eq!(result.annotation_count, 3);

        let outline = server.pdf_outline(Parameters(PathRequest {
            path: output.display().to_string(),
        }));
        let entries: Vec<OutlineEntryResult> = serde_json::from_str(&outline).unwrap();
        let summary: Vec<(&str, Option<u32>, u32)> = entries
            .iter()
            .map(|e| (e.title.as_str(), e.page, e.level))
            .collect();
        assert_eq!(
            summary,
            vec![("One", Some(1), 1), ("Two", Some(4), 1), ("Two A", Some(5), 2)]
        );
    }

    #[tokio::test]
    async fn test_generate_writes_output_atomically() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let entries = dir.path().join("entries.json");
        std::fs::write(&input, sample_pdf_bytes(3)).unwrap();
        std::fs::write(&entries, r#"[{"title": "One", "to": 1}]"#).unwrap();
        let request = |output: &Path| GenerateRequest {
            path: input.display().to_string(),
            output: output.display().to_string(),
            entries: Some(entries.display().to_string()),
            config: None,
            insert_at: None,
            offset: None,
            outline_only: false,
            auto_font_size: true,
        };

        let server = TocServer::new();
        let output = dir.path().join("out.pdf");
        let response = server.pdf_generate_toc(Parameters(request(&output))).await;
        assert!(!response.starts_with("Error:"), "{}", response);
        assert!(output.exists());
        assert!(!dir.path().join("out.pdf.tmp").exists());

        let unwritable = dir.path().join("missing").join("out.pdf");
        let response = server.pdf_generate_toc(Parameters(request(&unwritable))).await;
        assert!(response.starts_with("Error:"));
        assert!(!unwritable.exists());
    }

    #[tokio::test]
    async fn test_render_page_cache_and_clear() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, sample_pdf_bytes(2)).unwrap();
        let output = dir.path().join("page.png");
        let request = || RenderPageRequest {
            path: input.display().to_string(),
            page: 2,
            output: output.display().to_string(),
            width: None,
            surface: None,
        };

        let server = TocServer::new();
        let first: RenderResult =
            serde_json::from_str(&server.pdf_render_page(Parameters(request())).await).unwrap();
        assert_eq!((first.width, first.height), (1190, 1684));
        assert!(!first.cached);
        assert_eq!(image::open(&output).unwrap().width(), 1190);

        let second: RenderResult =
            serde_json::from_str(&server.pdf_render_page(Parameters(request())).await).unwrap();
        assert!(second.cached);

        let status: RenderStatusResult = serde_json::from_str(
            &server.pdf_render_status(Parameters(RenderStatusRequest { surface: None })),
        )
        .unwrap();
        assert_eq!((status.active, status.queued, status.surface_busy), (0, 0, None));

        server.pdf_clear_render_cache();
        let third: RenderResult =
            serde_json::from_str(&server.pdf_render_page(Parameters(request())).await).unwrap();
        assert!(!third.cached);
    }

    #[tokio::test]
    async fn test_render_page_onto_surface() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        std::fs::write(&input, sample_pdf_bytes(1)).unwrap();
        let output = dir.path().join("thumb.png");

        let server = TocServer::new();
        let response = server
            .pdf_render_page(Parameters(RenderPageRequest {
                path: input.display().to_string(),
                page: 1,
                output: output.display().to_string(),
                width: Some(60),
                surface: Some("thumbnail".to_string()),
            }))
            .await;
        let rendered: RenderResult = serde_json::from_str(&response).unwrap();
        assert_eq!(rendered.width, 60);
        assert!(!rendered.cached);

        let status: RenderStatusResult = serde_json::from_str(&server.pdf_render_status(
            Parameters(RenderStatusRequest {
                surface: Some("thumbnail".to_string()),
            }),
        ))
        .unwrap();
        assert_eq!(status.surface_busy, Some(false));

        let cancelled: CancelResult = serde_json::from_str(
            &server
                .pdf_cancel_render(Parameters(SurfaceRequest {
                    surface: "thumbnail".to_string(),
                }))
                .await,
        )
        .unwrap();
        assert!(!cancelled.cancelled);
    }

    #[test]
    fn test_errors_are_reported_as_text() {
        let server = TocServer::new();
        let response = server.pdf_detect_toc(Parameters(PathRequest {
            path: "/nonexistent/file.pdf".to_string(),
        }));
        assert!(response.starts_with("Error:"));
    }
}
