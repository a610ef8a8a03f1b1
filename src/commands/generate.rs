use crate::config::TocConfig;
use crate::entries::parse_entries;
use crate::generate::{GeneratedToc, TocGenerator};
use crate::pdf::toc::import_outline;
use crate::pdf::PdfDocument;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub config: Option<PathBuf>,
    pub insert_at: Option<u32>,
    pub offset: Option<i64>,
    pub font: Option<PathBuf>,
    pub no_pages: bool,
    pub auto_font_size: bool,
}

pub fn load_config(options: &GenerateOptions) -> Result<TocConfig> {
    let mut config = match &options.config {
        Some(path) => TocConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TocConfig::default(),
    };
    if let Some(page) = options.insert_at {
        config.insert_at_page = page;
    }
    if let Some(offset) = options.offset {
        config.page_offset = offset;
    }
    if let Some(font) = &options.font {
        config.font.family = font
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| font.display().to_string());
        config.font.regular = Some(font.clone());
        config.font.bold = None;
        config.font.required = true;
    }
    if options.no_pages {
        config.add_physical_toc_page = false;
    }
    if options.auto_font_size {
        config.auto_font_size = true;
    }
    config.validate()?;
    Ok(config)
}

/// Generate from `entries` (a JSON file) or, without one, from the input's own bookmarks.
pub async fn generate_file(
    input: &Path,
    entries: Option<&Path>,
    config: TocConfig,
) -> Result<GeneratedToc> {
    let bytes =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let entries = match entries {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            parse_entries(&json).with_context(|| format!("Invalid entries in {}", path.display()))?
        }
        None => import_outline(&PdfDocument::from_bytes(&bytes)?.doc)?,
    };
    if entries.is_empty() {
        bail!("No entries to generate a table of contents from");
    }

    let generator = TocGenerator::new(config).await?;
    Ok(generator.generate(&bytes, &entries)?)
}

pub async fn run(
    input: &Path,
    entries: Option<&Path>,
    output: &Path,
    options: &GenerateOptions,
) -> Result<()> {
    let config = load_config(options)?;
    let result = generate_file(input, entries, config).await?;
    write_atomically(output, &result.bytes)?;

    println!(
        "Wrote {} ({} ToC page(s), {} link(s){})",
        output.display(),
        result.toc_page_count,
        result.annotation_count,
        if result.outline_written {
            ", bookmarks"
        } else {
            ""
        }
    );
    Ok(())
}

/// Write to a sibling temp file first so a failed write never leaves a truncated PDF.
pub fn write_atomically(output: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = output.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, output)
        .with_context(|| format!("Failed to move output into {}", output.display()))?;
    Ok(())
}
