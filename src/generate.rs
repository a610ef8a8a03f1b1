use std::collections::BTreeSet;

use log::{info, warn};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::config::TocConfig;
use crate::entries::{apply_custom_prefix, validate_forest, EntryNode};
use crate::error::{Result, TocError};
use crate::layout::{FontRole, PaginationEngine, TocLayout, TocPage};
use crate::page_index::PageIndexMapper;
use crate::pdf::annotations::resolve_annotations;
use crate::pdf::fonts::{TocFont, TocFonts};
use crate::pdf::outline::write_outline;
use crate::pdf::page_labels;
use crate::pdf::PdfDocument;

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedToc {
    pub bytes: Vec<u8>,
    /// Pages actually inserted; zero when only the outline was written.
    pub toc_page_count: u32,
    pub outline_written: bool,
    pub annotation_count: usize,
}

/// Inserts ToC pages, bookmarks, links and page labels into a document.
pub struct TocGenerator {
    config: TocConfig,
    fonts: TocFonts,
}

impl TocGenerator {
    /// Validate `config` and load its fonts.
    pub async fn new(config: TocConfig) -> Result<Self> {
        config.validate()?;
        let fonts = TocFonts::load(&config.font).await?;
        Self::with_fonts(config, fonts)
    }

    pub fn with_fonts(config: TocConfig, fonts: TocFonts) -> Result<Self> {
        config.validate()?;
        Ok(TocGenerator { config, fonts })
    }

    /// Run the whole restructuring on a copy of `pdf_bytes`.
    ///
    /// Either every step succeeds and the new document is returned, or an error is
    /// returned and nothing is produced.
    pub fn generate(&self, pdf_bytes: &[u8], entries: &[EntryNode]) -> Result<GeneratedToc> {
        validate_forest(entries)?;
        let entries = if self.config.prefix_settings.enabled {
            apply_custom_prefix(entries, &self.config.prefix_settings.configs)
        } else {
            entries.to_vec()
        };

        let mut pdf = PdfDocument::from_bytes(pdf_bytes)?;
        let original_pages = pdf.page_count();
        if original_pages == 0 {
            return Err(TocError::input("Document has no pages"));
        }
        let insertion_index =
            (self.config.insert_at_page.max(1) - 1).min(original_pages) as usize;

        let mut inserted: Vec<ObjectId> = Vec::new();
        let mut pending = Vec::new();
        if self.config.add_physical_toc_page {
            let page_size = pdf.reference_page_size()?;
            let config = self.config.for_page_width(page_size.0);
            let layout = PaginationEngine::new(&config, &self.fonts, page_size)
                .layout(&entries)?;
            self.warn_missing_glyphs(&layout);

            let pages = self.page_dictionaries(&mut pdf.doc, &layout)?;
            inserted = pdf.insert_pages(insertion_index, pages)?;
            pending = layout.pending;
            info!(
                "Inserted {} ToC page(s) before page {}",
                inserted.len(),
                insertion_index + 1
            );
        }

        // Layout is done, so the inserted page count is final from here on.
        let toc_page_count = inserted.len() as u32;
        let mapper = PageIndexMapper::new(
            self.config.page_offset,
            insertion_index as u32 + 1,
            toc_page_count,
            pdf.page_count(),
        );

        let outline_written = write_outline(&mut pdf, &entries, &mapper)?;
        let annotation_count =
            resolve_annotations(&mut pdf.doc, pending, &inserted, &mapper.without_offset())?;
        page_labels::serialize(&mut pdf.doc, &self.config.page_labels)?;

        let bytes = pdf.save_to_bytes()?;
        Ok(GeneratedToc {
            bytes,
            toc_page_count,
            outline_written,
            annotation_count,
        })
    }

    fn font(&self, role: FontRole) -> &TocFont {
        match role {
            FontRole::Regular => &self.fonts.regular,
            FontRole::Bold => &self.fonts.bold,
        }
    }

    fn warn_missing_glyphs(&self, layout: &TocLayout) {
        for role in [FontRole::Regular, FontRole::Bold] {
            let font = self.font(role);
            let missing: BTreeSet<char> = layout
                .text_for(role)
                .chars()
                .filter(|c| !c.is_whitespace() && !font.covers(*c))
                .collect();
            if !missing.is_empty() {
                warn!(
                    "{} distinct character(s) have no glyph in the {:?} ToC font {}, e.g. {:?}",
                    missing.len(),
                    role,
                    font.name(),
                    missing.iter().take(5).collect::<String>()
                );
            }
        }
    }

    fn page_dictionaries(&self, doc: &mut Document, layout: &TocLayout) -> Result<Vec<Dictionary>> {
        let mut fonts = Dictionary::new();
        for (role, name) in [(FontRole::Regular, "F1"), (FontRole::Bold, "F2")] {
            let text = layout.text_for(role);
            if !text.is_empty() {
                fonts.set(name, self.font(role).embed(doc, &text)?);
            }
        }
        let resources_id = doc.add_object(dictionary! { "Font" => fonts });

        let media_box: Vec<Object> = vec![
            0.into(),
            0.into(),
            Object::Real(layout.page_width),
            Object::Real(layout.page_height),
        ];

        layout
            .pages
            .iter()
            .map(|page| {
                let content = Content {
                    operations: self.page_operations(page),
                };
                let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
                Ok(dictionary! {
                    "Type" => "Page",
                    "MediaBox" => media_box.clone(),
                    "Contents" => content_id,
                    "Resources" => resources_id,
                })
            })
            .collect()
    }

    fn page_operations(&self, page: &TocPage) -> Vec<Operation> {
        let mut operations = Vec::with_capacity(page.runs.len() * 6);
        for run in &page.runs {
            let font_name = match run.font {
                FontRole::Regular => "F1",
                FontRole::Bold => "F2",
            };
            operations.extend([
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![font_name.into(), Object::Real(run.size)]),
                Operation::new(
                    "rg",
                    vec![
                        Object::Real(run.color.0),
                        Object::Real(run.color.1),
                        Object::Real(run.color.2),
                    ],
                ),
                Operation::new("Td", vec![Object::Real(run.x), Object::Real(run.y)]),
                Operation::new("Tj", vec![self.font(run.font).text_object(&run.text)]),
                Operation::new("ET", vec![]),
            ]);
        }
        operations
    }
}
