use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tocpdf")]
#[command(about = "Generate clickable tables of contents, bookmarks and page labels for PDFs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run as MCP server
    Mcp,

    /// Insert ToC pages, bookmarks and page labels
    Generate {
        /// PDF file to restructure
        path: PathBuf,

        /// Entries as JSON: nested {title, to, children} or flat {title, level, page}.
        /// Defaults to the document's existing bookmarks.
        #[arg(short, long)]
        entries: Option<PathBuf>,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Page before which the ToC pages are inserted
        #[arg(long)]
        insert_at: Option<u32>,

        /// Added to every entry's page number
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i64>,

        /// TrueType font for the ToC text
        #[arg(long)]
        font: Option<PathBuf>,

        /// Only write bookmarks
        #[arg(long)]
        no_pages: bool,

        /// Scale ToC font sizes to the page width
        #[arg(long)]
        auto_font_size: bool,
    },

    /// Print the bookmark tree
    #[command(alias = "toc")]
    Outline {
        /// PDF file to inspect
        path: PathBuf,

        /// Also show which bookmarks contain this page
        #[arg(long)]
        active_page: Option<u32>,

        /// Print as JSON entries
        #[arg(long)]
        json: bool,
    },

    /// Show page label mapping (logical vs physical page numbers)
    PageLabels {
        /// PDF file to inspect
        path: PathBuf,

        /// Suggest segments for a ToC on these pages (e.g., "3-4")
        #[arg(long)]
        suggest: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find pages that look like a printed table of contents
    Detect {
        /// PDF file to scan
        path: PathBuf,
    },

    /// Render pages to PNG
    Render {
        /// PDF file to render
        path: PathBuf,

        /// Page ranges (e.g., "1-5,10")
        #[arg(default_value = "1")]
        pages: String,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Thumbnail width in pixels
        #[arg(short, long)]
        width: Option<u32>,
    },
}
