//! Pagination of an entry forest onto freshly created ToC pages.
//!
//! Layout is pure: it produces positioned text runs and pending link rectangles, and
//! the generator turns those into page objects afterwards. Link targets stay logical
//! until the final number of ToC pages is known.

use crate::config::{layout, Rgb, StyleConfig, TocConfig};
use crate::entries::{EntryNode, EntryTarget};
use crate::error::Result;
use crate::pdf::fonts::{FontMetrics, TocFonts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontRole {
    Regular,
    Bold,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub size: f32,
    pub font: FontRole,
    pub color: Rgb,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TocPage {
    pub runs: Vec<TextRun>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    /// Page in the original document, page offset already applied.
    Page(i64),
    Uri(String),
}

/// A link rectangle waiting for its target page to be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAnnotation {
    /// Index into [`TocLayout::pages`].
    pub host_page: usize,
    pub rect: [f32; 4],
    pub target: LinkTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TocLayout {
    pub page_width: f32,
    pub page_height: f32,
    pub pages: Vec<TocPage>,
    pub pending: Vec<PendingAnnotation>,
}

impl TocLayout {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Concatenated text drawn with `role`, for font subsetting.
    pub fn text_for(&self, role: FontRole) -> String {
        self.pages
            .iter()
            .flat_map(|page| page.runs.iter())
            .filter(|run| run.font == role)
            .map(|run| run.text.as_str())
            .collect()
    }
}

/// Position where the next row will be drawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutCursor {
    pub page: usize,
    pub y: f32,
}

pub struct PaginationEngine<'a> {
    config: &'a TocConfig,
    fonts: &'a TocFonts,
    page_width: f32,
    page_height: f32,
}

impl<'a> PaginationEngine<'a> {
    pub fn new(config: &'a TocConfig, fonts: &'a TocFonts, page_size: (f32, f32)) -> Self {
        PaginationEngine {
            config,
            fonts,
            page_width: page_size.0,
            page_height: page_size.1,
        }
    }

    /// Lay out the heading and every entry. Always produces at least one page.
    pub fn layout(&self, entries: &[EntryNode]) -> Result<TocLayout> {
        let mut out = TocLayout {
            page_width: self.page_width,
            page_height: self.page_height,
            pages: vec![TocPage::default()],
            pending: Vec::new(),
        };

        let margin_x = self.page_width * layout::MARGIN_X_RATIO;
        let title_ratio = self
            .config
            .title_y_start
            .unwrap_or(layout::DEFAULT_TITLE_Y_RATIO);
        let heading_y = self.page_height * (1.0 - title_ratio);
        out.pages[0].runs.push(TextRun {
            text: heading_text(self.config, entries),
            x: margin_x,
            y: heading_y,
            size: self.page_width * layout::HEADING_FONT_SIZE_RATIO,
            font: FontRole::Bold,
            color: Rgb(0.0, 0.0, 0.0),
        });

        let cursor = LayoutCursor {
            page: 0,
            y: heading_y - self.page_height * layout::HEADING_MARGIN_BOTTOM_RATIO,
        };
        self.layout_level(entries, 0, cursor, &mut out)?;
        Ok(out)
    }

    fn layout_level(
        &self,
        nodes: &[EntryNode],
        depth: usize,
        mut cursor: LayoutCursor,
        out: &mut TocLayout,
    ) -> Result<LayoutCursor> {
        let style = self.config.style_for_depth(depth);
        let color = style.rgb()?;
        let (role, font) = if depth == 0 {
            (FontRole::Bold, &self.fonts.bold)
        } else {
            (FontRole::Regular, &self.fonts.regular)
        };

        let margin_x = self.page_width * layout::MARGIN_X_RATIO;
        let margin_bottom = self.page_height * layout::MARGIN_BOTTOM_RATIO;
        let indentation = depth as f32 * self.page_width * layout::INDENT_PER_LEVEL_RATIO;
        let title_x = margin_x + indentation;
        let max_width =
            self.page_width - self.page_width * layout::RIGHT_PAD_RATIO - indentation;
        let line_height = style.line_height();

        for node in nodes {
            let lines = split_into_lines(node.title.trim(), style.font_size, font, max_width);

            if cursor.y - lines.len() as f32 * line_height < margin_bottom {
                out.pages.push(TocPage::default());
                cursor = LayoutCursor {
                    page: out.pages.len() - 1,
                    y: self.page_height - margin_bottom - line_height,
                };
            }
            if depth == 0 {
                cursor.y -= self.page_height * layout::FIRST_LEVEL_GAP_RATIO;
            }

            let annot_top = cursor.y + style.font_size;
            let page = &mut out.pages[cursor.page];
            let last = lines.len() - 1;
            for (i, line) in lines.iter().enumerate() {
                page.runs.push(TextRun {
                    text: line.clone(),
                    x: title_x,
                    y: cursor.y,
                    size: style.font_size,
                    font: role,
                    color,
                });
                if i < last {
                    cursor.y -= line_height;
                }
            }

            if let Some(number) = node.target.page() {
                let number_text = number.to_string();
                let number_x = self.page_width
                    - self.page_width * layout::PAGE_NUM_PAD_RATIO
                    - font.width_of_text_at_size(&number_text, style.font_size);
                page.runs.push(TextRun {
                    text: number_text,
                    x: number_x,
                    y: cursor.y,
                    size: style.font_size,
                    font: role,
                    color,
                });

                if style.dot_leader {
                    let title_width =
                        font.width_of_text_at_size(&lines[last], style.font_size);
                    let dots_start = title_x + title_width + layout::DOT_GAP_TITLE;
                    if let Some(dots) =
                        self.dot_leader(style, dots_start, number_x - layout::DOT_GAP_NUMBER)
                    {
                        page.runs.push(TextRun {
                            text: dots,
                            x: dots_start,
                            y: cursor.y,
                            size: style.font_size,
                            font: FontRole::Regular,
                            color,
                        });
                    }
                }
            }

            out.pending.push(PendingAnnotation {
                host_page: cursor.page,
                rect: [
                    title_x,
                    cursor.y - layout::ANNOT_Y_PADDING,
                    self.page_width - margin_x,
                    annot_top,
                ],
                target: match &node.target {
                    EntryTarget::Page(page) | EntryTarget::Position(page, _, _) => {
                        LinkTarget::Page(i64::from(*page) + self.config.page_offset)
                    }
                    EntryTarget::Uri(uri) => LinkTarget::Uri(uri.clone()),
                },
            });

            cursor.y -= line_height;

            if !node.children.is_empty() {
                cursor = self.layout_level(&node.children, depth + 1, cursor, out)?;
            }
        }

        Ok(cursor)
    }

    /// Run of dots filling `start..end`, minus a few so it never touches the number.
    fn dot_leader(&self, style: &StyleConfig, start: f32, end: f32) -> Option<String> {
        let available = end - start;
        let dot_width = self.fonts.regular.width_of_text_at_size(".", style.font_size);
        if available <= 0.0 || dot_width <= 0.0 {
            return None;
        }
        let count = ((available / dot_width).floor() as usize)
            .saturating_sub(layout::DOT_RESERVE_COUNT);
        (count > 0).then(|| ".".repeat(count))
    }
}

/// Configured heading, else one matching the script of the top-level titles.
pub fn heading_text(config: &TocConfig, entries: &[EntryNode]) -> String {
    if let Some(heading) = config.heading.as_ref().filter(|h| !h.trim().is_empty()) {
        return heading.clone();
    }
    if entries.iter().any(|e| contains_cjk(&e.title)) {
        "目录".to_string()
    } else {
        "Table of Contents".to_string()
    }
}

pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(|c| {
        matches!(c,
            '\u{3040}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{F900}'..='\u{FAFF}')
    })
}

/// Wrap `text` character by character so each line fits `max_width`.
///
/// A character that alone is wider than `max_width` still gets its own line, so
/// wrapping always makes progress. Returns at least one (possibly empty) line.
pub fn split_into_lines(
    text: &str,
    size: f32,
    font: &impl FontMetrics,
    max_width: f32,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if font.width_of_text_at_size(&current, size) > max_width && current.chars().count() > 1
        {
            current.pop();
            lines.push(std::mem::take(&mut current));
            current.push(c);
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fonts::StandardFont;

    /// Every character is `size` points wide.
    struct Monospace;

    impl FontMetrics for Monospace {
        fn width_of_text_at_size(&self, text: &str, size: f32) -> f32 {
            text.chars().count() as f32 * size
        }
    }

    #[test]
    fn test_split_into_lines_wraps_by_character() {
        let lines = split_into_lines("abcdefg", 1.0, &Monospace, 3.0);
        assert_eq!(lines, vec!["abc", "def", "g"]);
        let lines = split_into_lines("中文标题很长", 10.0, &Monospace, 25.0);
        assert_eq!(lines, vec!["中文", "标题", "很长"]);
    }

    #[test]
    fn test_split_into_lines_always_progresses() {
        let lines = split_into_lines("abc", 10.0, &Monospace, 1.0);
        assert_eq!(lines, vec!["a", "b", "c"]);
        let lines = split_into_lines("abc", 10.0, &Monospace, 0.0);
        assert_eq!(lines.len(), 3);
        assert_eq!(split_into_lines("", 10.0, &Monospace, 100.0), vec![""]);
    }

    #[test]
    fn test_heading_text() {
        let mut config = TocConfig::default();
        let latin = vec![EntryNode::new("Intro", 1)];
        let cjk = vec![EntryNode::new("Intro", 1), EntryNode::new("第一章", 2)];
        assert_eq!(heading_text(&config, &latin), "Table of Contents");
        assert_eq!(heading_text(&config, &cjk), "目录");
        config.heading = Some("Contents".to_string());
        assert_eq!(heading_text(&config, &cjk), "Contents");
    }

    fn scenario_a() -> Vec<EntryNode> {
        vec![
            EntryNode::new("Intro", 1).with_children(vec![EntryNode::new("Setup", 2)]),
            EntryNode::new("Usage", 5),
        ]
    }

    #[test]
    fn test_layout_single_page() {
        let config = TocConfig::default();
        let fonts = TocFonts::standard();
        let engine = PaginationEngine::new(&config, &fonts, (595.0, 842.0));
        let result = engine.layout(&scenario_a()).unwrap();

        assert_eq!(result.page_count(), 1);
        assert_eq!(result.pending.len(), 3);
        assert!(result.pending.iter().all(|p| p.host_page == 0));
        assert_eq!(result.pending[2].target, LinkTarget::Page(5));

        let runs = &result.pages[0].runs;
        assert_eq!(runs[0].text, "Table of Contents");
        assert_eq!(runs[0].font, FontRole::Bold);
        // first level rows carry a dot leader, the nested row does not
        let dots = runs.iter().filter(|r| r.text.starts_with('.')).count();
        assert_eq!(dots, 2);

        // rows descend the page
        let ys: Vec<f32> = result.pending.iter().map(|p| p.rect[1]).collect();
        assert!(ys.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_page_number_is_right_aligned_and_clear_of_dots() {
        let config = TocConfig::default();
        let fonts = TocFonts::standard();
        let engine = PaginationEngine::new(&config, &fonts, (595.0, 842.0));
        let result = engine.layout(&[EntryNode::new("Intro", 12)]).unwrap();
        let runs = &result.pages[0].runs;

        let number = runs.iter().find(|r| r.text == "12").unwrap();
        let width = StandardFont::helvetica_bold().width_of_text_at_size("12", number.size);
        let right_edge = 595.0 - 595.0 * layout::PAGE_NUM_PAD_RATIO;
        assert!((number.x + width - right_edge).abs() < 1e-3);

        let dots = runs.iter().find(|r| r.text.starts_with('.')).unwrap();
        let dots_end = dots.x
            + StandardFont::helvetica().width_of_text_at_size(&dots.text, dots.size);
        assert!(dots_end <= number.x - layout::DOT_GAP_NUMBER);
    }

    #[test]
    fn test_layout_breaks_onto_new_pages() {
        let config = TocConfig::default();
        let fonts = TocFonts::standard();
        let engine = PaginationEngine::new(&config, &fonts, (595.0, 842.0));
        let entries: Vec<_> = (1..=80).map(|i| EntryNode::new(format!("Chapter {}", i), i)).collect();
        let result = engine.layout(&entries).unwrap();

        assert!(result.page_count() > 1);
        let margin_bottom = 842.0 * layout::MARGIN_BOTTOM_RATIO;
        for page in &result.pages {
            assert!(page.runs.iter().all(|r| r.y >= margin_bottom - 1e-3));
        }
        // hosts are non-decreasing and the last row sits on the last page
        assert!(result
            .pending
            .windows(2)
            .all(|w| w[0].host_page <= w[1].host_page));
        assert_eq!(
            result.pending.last().map(|p| p.host_page),
            Some(result.pages.len() - 1)
        );
    }

    #[test]
    fn test_offset_and_uri_targets() {
        let config = TocConfig {
            page_offset: 4,
            ..TocConfig::default()
        };
        let fonts = TocFonts::standard();
        let engine = PaginationEngine::new(&config, &fonts, (595.0, 842.0));
        let mut site = EntryNode::new("Website", 1);
        site.target = EntryTarget::Uri("https://example.com".to_string());
        let result = engine
            .layout(&[EntryNode::new("Intro", 1), site])
            .unwrap();

        assert_eq!(result.pending[0].target, LinkTarget::Page(5));
        assert_eq!(
            result.pending[1].target,
            LinkTarget::Uri("https://example.com".to_string())
        );
        // the link row draws no page number
        let numbers = result.pages[0].runs.iter().filter(|r| r.text == "1").count();
        assert_eq!(numbers, 1);
    }

    #[test]
    fn test_narrow_page_still_terminates() {
        let config = TocConfig::default();
        let fonts = TocFonts::standard();
        let engine = PaginationEngine::new(&config, &fonts, (20.0, 60.0));
        let result = engine
            .layout(&[EntryNode::new("A very long title that cannot fit", 1)])
            .unwrap();
        assert!(result.page_count() >= 1);
        assert_eq!(result.pending.len(), 1);
    }
}
