use log::debug;
use lopdf::{dictionary, Dictionary, Document, Object};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::lenient_int;
use crate::error::Result;
use crate::numbering::{to_alpha, to_roman};
use crate::pdf::document::{decode_pdf_string, encode_text_string};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelStyle {
    #[default]
    Decimal,
    RomanUpper,
    RomanLower,
    AlphaUpper,
    AlphaLower,
    /// Prefix only.
    None,
}

impl LabelStyle {
    fn pdf_name(self) -> Option<&'static str> {
        match self {
            LabelStyle::Decimal => Some("D"),
            LabelStyle::RomanUpper => Some("R"),
            LabelStyle::RomanLower => Some("r"),
            LabelStyle::AlphaUpper => Some("A"),
            LabelStyle::AlphaLower => Some("a"),
            LabelStyle::None => None,
        }
    }

    fn from_pdf_name(name: &[u8]) -> Self {
        match name {
            b"R" => LabelStyle::RomanUpper,
            b"r" => LabelStyle::RomanLower,
            b"A" => LabelStyle::AlphaUpper,
            b"a" => LabelStyle::AlphaLower,
            _ => LabelStyle::Decimal,
        }
    }
}

/// Numbering rule starting at a physical page and running to the next segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLabelSegment {
    /// 1-based physical page in the final document.
    #[serde(deserialize_with = "lenient_page", default = "one")]
    pub start_page: i64,
    #[serde(default)]
    pub style: LabelStyle,
    #[serde(default)]
    pub prefix: String,
    #[serde(deserialize_with = "lenient_page", default = "one")]
    pub start_at: i64,
}

fn one() -> i64 {
    1
}

/// Unreadable values become 1, like an unset field.
fn lenient_page<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(lenient_int(&value).filter(|n| *n != 0).unwrap_or(1))
}

impl PageLabelSegment {
    pub fn new(start_page: i64, style: LabelStyle) -> Self {
        PageLabelSegment {
            start_page,
            style,
            prefix: String::new(),
            start_at: 1,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_start_at(mut self, start_at: i64) -> Self {
        self.start_at = start_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLabelSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub segments: Vec<PageLabelSegment>,
}

impl Default for PageLabelSettings {
    fn default() -> Self {
        PageLabelSettings {
            enabled: false,
            segments: vec![PageLabelSegment::new(1, LabelStyle::Decimal)],
        }
    }
}

/// True when the segments describe plain 1, 2, 3 numbering.
pub fn is_default_segments(segments: &[PageLabelSegment]) -> bool {
    match segments {
        [] => true,
        [only] => {
            only.start_page == 1
                && only.style == LabelStyle::Decimal
                && only.prefix.is_empty()
                && only.start_at == 1
        }
        _ => false,
    }
}

/// Sort by start page, clamp into the document and keep the last of any duplicates.
pub fn normalize(segments: &[PageLabelSegment], total_pages: u32) -> Vec<PageLabelSegment> {
    let mut cleaned: Vec<PageLabelSegment> = segments
        .iter()
        .map(|seg| {
            let mut start_page = seg.start_page.max(1);
            if total_pages > 0 {
                start_page = start_page.min(i64::from(total_pages));
            }
            PageLabelSegment {
                start_page,
                style: seg.style,
                prefix: seg.prefix.clone(),
                start_at: seg.start_at.max(1),
            }
        })
        .collect();

    // stable, so equal start pages keep their input order
    cleaned.sort_by_key(|seg| seg.start_page);

    let mut deduped: Vec<PageLabelSegment> = Vec::with_capacity(cleaned.len());
    for seg in cleaned {
        match deduped.last_mut() {
            Some(last) if last.start_page == seg.start_page => *last = seg,
            _ => deduped.push(seg),
        }
    }
    deduped
}

/// Label of the zero-based page `index` under already normalized segments.
///
/// Pages before the first segment use the first segment. A `None` style shows the
/// physical page number after the prefix.
pub fn format(index: usize, segments: &[PageLabelSegment], total_pages: u32) -> String {
    let page = index as i64 + 1;
    if segments.is_empty() || (total_pages > 0 && page > i64::from(total_pages)) {
        return page.to_string();
    }

    let position = segments.partition_point(|seg| seg.start_page <= page);
    let seg = &segments[position.saturating_sub(1)];
    let num = seg.start_at + (page - seg.start_page);

    let number = match seg.style {
        LabelStyle::Decimal => num.to_string(),
        LabelStyle::RomanUpper => roman(num),
        LabelStyle::RomanLower => roman(num).to_lowercase(),
        LabelStyle::AlphaUpper => alpha(num),
        LabelStyle::AlphaLower => alpha(num).to_lowercase(),
        LabelStyle::None => page.to_string(),
    };
    format!("{}{}", seg.prefix, number)
}

fn roman(n: i64) -> String {
    u32::try_from(n)
        .ok()
        .and_then(to_roman)
        .unwrap_or_else(|| n.to_string())
}

fn alpha(n: i64) -> String {
    u32::try_from(n)
        .ok()
        .and_then(to_alpha)
        .unwrap_or_else(|| n.to_string())
}

/// Write `/PageLabels` for `settings`, or remove it when disabled or empty.
pub fn serialize(doc: &mut Document, settings: &PageLabelSettings) -> Result<()> {
    let total_pages = doc.get_pages().len() as u32;
    let nums: Vec<Object> = if settings.enabled {
        normalize(&settings.segments, total_pages)
            .iter()
            .filter_map(|seg| {
                let label = label_dictionary(seg)?;
                Some([Object::Integer(seg.start_page - 1), Object::Dictionary(label)])
            })
            .flatten()
            .collect()
    } else {
        Vec::new()
    };

    let root_id = doc.trailer.get(b"Root")?.as_reference()?;
    if nums.is_empty() {
        let catalog = doc.get_object_mut(root_id)?.as_dict_mut()?;
        if catalog.remove(b"PageLabels").is_some() {
            debug!("Removed page labels");
        }
        return Ok(());
    }

    let ranges = nums.len() / 2;
    let tree_id = doc.add_object(dictionary! { "Nums" => nums });
    doc.get_object_mut(root_id)?
        .as_dict_mut()?
        .set("PageLabels", tree_id);
    debug!("Wrote {} page label range(s)", ranges);
    Ok(())
}

fn label_dictionary(seg: &PageLabelSegment) -> Option<Dictionary> {
    let mut label = Dictionary::new();
    let style = seg.style.pdf_name();
    if let Some(name) = style {
        label.set("S", name);
    }
    if !seg.prefix.is_empty() {
        label.set("P", encode_text_string(&seg.prefix));
    }
    if style.is_some() && seg.start_at > 1 {
        label.set("St", seg.start_at);
    }
    (!label.is_empty()).then_some(label)
}

/// Segments of an existing `/PageLabels` number tree, empty when there is none.
pub fn read_segments(doc: &Document) -> Result<Vec<PageLabelSegment>> {
    let catalog = doc.catalog()?;
    let tree = match catalog.get(b"PageLabels") {
        Ok(Object::Reference(r)) => match doc.get_dictionary(*r) {
            Ok(d) => d,
            _ => return Ok(Vec::new()),
        },
        Ok(Object::Dictionary(d)) => d,
        _ => return Ok(Vec::new()),
    };

    let mut segments = Vec::new();
    parse_number_tree(doc, tree, &mut segments, 0);
    segments.sort_by_key(|seg| seg.start_page);
    Ok(segments)
}

fn parse_number_tree(
    doc: &Document,
    dict: &Dictionary,
    segments: &mut Vec<PageLabelSegment>,
    depth: usize,
) {
    if depth > 32 {
        return;
    }

    // Nums array format: [page_index, label_dict, page_index, label_dict, ...]
    if let Ok(Object::Array(nums)) = dict.get(b"Nums") {
        for chunk in nums.chunks_exact(2) {
            let Object::Integer(start_index) = &chunk[0] else {
                continue;
            };
            let label = match &chunk[1] {
                Object::Dictionary(d) => d,
                Object::Reference(r) => match doc.get_dictionary(*r) {
                    Ok(d) => d,
                    _ => continue,
                },
                _ => continue,
            };

            let style = match label.get(b"S") {
                Ok(Object::Name(name)) => LabelStyle::from_pdf_name(name),
                _ => LabelStyle::None,
            };
            let prefix = match label.get(b"P") {
                Ok(Object::String(bytes, _)) => decode_pdf_string(bytes),
                _ => String::new(),
            };
            let start_at = match label.get(b"St") {
                Ok(Object::Integer(n)) => *n,
                _ => 1,
            };

            segments.push(
                PageLabelSegment::new(start_index + 1, style)
                    .with_prefix(prefix)
                    .with_start_at(start_at),
            );
        }
    }

    if let Ok(Object::Array(kids)) = dict.get(b"Kids") {
        for kid in kids {
            if let Object::Reference(kid_ref) = kid {
                if let Ok(kid_dict) = doc.get_dictionary(*kid_ref) {
                    parse_number_tree(doc, kid_dict, segments, depth + 1);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageLabel {
    pub physical_page: u32,
    pub label: String,
}

/// Label of every page, falling back to physical numbers without a label tree.
pub fn list_labels(doc: &Document) -> Result<Vec<PageLabel>> {
    let total = doc.get_pages().len() as u32;
    let segments = normalize(&read_segments(doc)?, total);
    Ok((1..=total)
        .map(|page| PageLabel {
            physical_page: page,
            label: format(page as usize - 1, &segments, total),
        })
        .collect())
}

/// Suggested labels around a ToC occupying `ranges` (1-based, inclusive): capital
/// letters for front matter, lower-case roman numerals for the ToC and decimal
/// numbers for the body.
pub fn suggest_segments_from_toc_ranges(
    ranges: &[(i64, i64)],
    total_pages: u32,
) -> Vec<PageLabelSegment> {
    let total = i64::from(total_pages);
    let bounds = ranges.iter().flat_map(|(start, end)| [*start, *end]);
    let (Some(min), Some(max)) = (bounds.clone().min(), bounds.max()) else {
        return vec![PageLabelSegment::new(1, LabelStyle::Decimal)];
    };
    if total == 0 {
        return vec![PageLabelSegment::new(1, LabelStyle::Decimal)];
    }

    let toc_start = min.clamp(1, total);
    let toc_end = max.min(total).max(toc_start);

    let mut segments = Vec::new();
    if toc_start > 1 {
        segments.push(PageLabelSegment::new(1, LabelStyle::AlphaUpper));
    }
    segments.push(PageLabelSegment::new(toc_start, LabelStyle::RomanLower));
    if toc_end < total {
        segments.push(PageLabelSegment::new(toc_end + 1, LabelStyle::Decimal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::testing::sample_pdf;
    use proptest::prelude::*;

    fn labels(segments: &[PageLabelSegment], total: u32) -> Vec<String> {
        let normalized = normalize(segments, total);
        (0..total as usize)
            .map(|i| format(i, &normalized, total))
            .collect()
    }

    #[test]
    fn test_alpha_then_decimal() {
        let segments = vec![
            PageLabelSegment::new(1, LabelStyle::AlphaLower),
            PageLabelSegment::new(4, LabelStyle::Decimal),
        ];
        let normalized = normalize(&segments, 10);
        assert_eq!(format(0, &normalized, 10), "a");
        assert_eq!(format(4, &normalized, 10), "2");
        assert_eq!(labels(&segments, 6), vec!["a", "b", "c", "1", "2", "3"]);
    }

    #[test]
    fn test_styles_prefixes_and_start_values() {
        let segments = vec![
            PageLabelSegment::new(1, LabelStyle::RomanLower),
            PageLabelSegment::new(3, LabelStyle::RomanUpper).with_start_at(4),
            PageLabelSegment::new(5, LabelStyle::Decimal).with_prefix("A-").with_start_at(10),
            PageLabelSegment::new(6, LabelStyle::None).with_prefix("Cover"),
        ];
        assert_eq!(
            labels(&segments, 6),
            vec!["i", "ii", "IV", "V", "A-10", "Cover6"]
        );
    }

    #[test]
    fn test_alpha_labels_repeat_letters() {
        let segments = vec![PageLabelSegment::new(1, LabelStyle::AlphaUpper).with_start_at(26)];
        assert_eq!(labels(&segments, 3), vec!["Z", "AA", "BB"]);
    }

    #[test]
    fn test_normalize_clamps_sorts_and_keeps_last_duplicate() {
        let segments = vec![
            PageLabelSegment::new(50, LabelStyle::Decimal),
            PageLabelSegment::new(3, LabelStyle::AlphaUpper),
            PageLabelSegment::new(-2, LabelStyle::RomanLower).with_start_at(-5),
            PageLabelSegment::new(3, LabelStyle::RomanUpper),
        ];
        let normalized = normalize(&segments, 10);
        assert_eq!(
            normalized,
            vec![
                PageLabelSegment::new(1, LabelStyle::RomanLower),
                PageLabelSegment::new(3, LabelStyle::RomanUpper),
                PageLabelSegment::new(10, LabelStyle::Decimal),
            ]
        );
    }

    #[test]
    fn test_lenient_segment_fields() {
        let settings: PageLabelSettings = serde_json::from_str(
            r#"{"enabled":true,"segments":[{"startPage":"4","style":"roman_lower","startAt":2.7},{"startPage":null}]}"#,
        )
        .unwrap();
        assert_eq!(settings.segments[0].start_page, 4);
        assert_eq!(settings.segments[0].start_at, 2);
        assert_eq!(settings.segments[1].start_page, 1);
        assert_eq!(settings.segments[1].style, LabelStyle::Decimal);
    }

    #[test]
    fn test_negative_start_page_string_clamps_to_first_page() {
        let settings: PageLabelSettings = serde_json::from_str(
            r#"{"enabled":true,"segments":[{"startPage":"-2","style":"roman_upper"}]}"#,
        )
        .unwrap();
        assert_eq!(settings.segments[0].start_page, -2);
        assert_eq!(normalize(&settings.segments, 5)[0].start_page, 1);
    }

    #[test]
    fn test_is_default_segments() {
        assert!(is_default_segments(&[]));
        assert!(is_default_segments(&PageLabelSettings::default().segments));
        assert!(!is_default_segments(&[PageLabelSegment::new(1, LabelStyle::RomanLower)]));
        assert!(!is_default_segments(&[
            PageLabelSegment::new(1, LabelStyle::Decimal),
            PageLabelSegment::new(3, LabelStyle::Decimal),
        ]));
    }

    #[test]
    fn test_suggest_segments() {
        assert_eq!(
            suggest_segments_from_toc_ranges(&[(3, 4)], 20),
            vec![
                PageLabelSegment::new(1, LabelStyle::AlphaUpper),
                PageLabelSegment::new(3, LabelStyle::RomanLower),
                PageLabelSegment::new(5, LabelStyle::Decimal),
            ]
        );
        assert_eq!(
            suggest_segments_from_toc_ranges(&[(1, 20)], 20),
            vec![PageLabelSegment::new(1, LabelStyle::RomanLower)]
        );
        assert_eq!(
            suggest_segments_from_toc_ranges(&[], 20),
            vec![PageLabelSegment::new(1, LabelStyle::Decimal)]
        );
    }

    #[test]
    fn test_serialize_and_read_back() {
        let mut doc = sample_pdf(6);
        let settings = PageLabelSettings {
            enabled: true,
            segments: vec![
                PageLabelSegment::new(1, LabelStyle::RomanLower),
                PageLabelSegment::new(3, LabelStyle::Decimal).with_prefix("P-").with_start_at(5),
                PageLabelSegment::new(5, LabelStyle::None),
            ],
        };
        serialize(&mut doc, &settings).unwrap();

        // the prefix-less "none" segment carries nothing and is dropped
        let read = read_segments(&doc).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1], PageLabelSegment::new(3, LabelStyle::Decimal).with_prefix("P-").with_start_at(5));

        let listed: Vec<String> = list_labels(&doc).unwrap().into_iter().map(|l| l.label).collect();
        assert_eq!(listed, vec!["i", "ii", "P-5", "P-6", "P-7", "P-8"]);
    }

    #[test]
    fn test_serialize_disabled_removes_labels() {
        let mut doc = sample_pdf(3);
        let mut settings = PageLabelSettings {
            enabled: true,
            segments: vec![PageLabelSegment::new(1, LabelStyle::RomanUpper)],
        };
        serialize(&mut doc, &settings).unwrap();
        assert!(doc.catalog().unwrap().has(b"PageLabels"));

        settings.enabled = false;
        serialize(&mut doc, &settings).unwrap();
        assert!(!doc.catalog().unwrap().has(b"PageLabels"));
        assert_eq!(list_labels(&doc).unwrap()[2].label, "3");
    }

    #[test]
    fn test_read_nested_number_tree() {
        let mut doc = sample_pdf(4);
        let kid = doc.add_object(dictionary! {
            "Nums" => vec![
                Object::Integer(2),
                Object::Dictionary(dictionary! { "S" => "A" }),
            ],
        });
        let tree = doc.add_object(dictionary! {
            "Nums" => vec![Object::Integer(0), Object::Dictionary(dictionary! { "S" => "r" })],
            "Kids" => vec![Object::Reference(kid)],
        });
        let root_id = doc.trailer.get(b"Root").unwrap().as_reference().unwrap();
        doc.get_object_mut(root_id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("PageLabels", tree);

        let listed: Vec<String> = list_labels(&doc).unwrap().into_iter().map(|l| l.label).collect();
        assert_eq!(listed, vec!["i", "ii", "A", "B"]);
    }

    fn segment_strategy() -> impl Strategy<Value = PageLabelSegment> {
        (-5i64..40, 0usize..6, -3i64..20).prop_map(|(start_page, style, start_at)| {
            let style = [
                LabelStyle::Decimal,
                LabelStyle::RomanUpper,
                LabelStyle::RomanLower,
                LabelStyle::AlphaUpper,
                LabelStyle::AlphaLower,
                LabelStyle::None,
            ][style];
            PageLabelSegment::new(start_page, style).with_start_at(start_at)
        })
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            segments in prop::collection::vec(segment_strategy(), 0..10),
            total in 1u32..30,
        ) {
            let once = normalize(&segments, total);
            prop_assert_eq!(normalize(&once, total), once.clone());
            prop_assert!(once.windows(2).all(|w| w[0].start_page < w[1].start_page));
        }

        #[test]
        fn decimal_labels_count_from_start(
            start_page in 1i64..20,
            start_at in 1i64..50,
            offset in 0i64..10,
        ) {
            let total = 40;
            let segments = normalize(
                &[PageLabelSegment::new(start_page, LabelStyle::Decimal).with_start_at(start_at)],
                total,
            );
            let page = start_page + offset;
            prop_assert_eq!(
                format(page as usize - 1, &segments, total),
                (start_at + offset).to_string()
            );
        }
    }
}
