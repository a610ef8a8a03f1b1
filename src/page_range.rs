use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRange {
    pub start: PageRef,
    pub end: Option<PageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRef {
    Number(u32),
    End,
}

impl PageRange {
    /// Parse a page range specification like "5", "9-6" or "3-end"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("Empty page range"));
        }

        if let Some(dash_pos) = s.find('-') {
            // "-5" is not a range
            if dash_pos == 0 {
                return Err(anyhow!("Invalid page range: {}", s));
            }
            Ok(PageRange {
                start: parse_page_ref(&s[..dash_pos])?,
                end: Some(parse_page_ref(&s[dash_pos + 1..])?),
            })
        } else {
            Ok(PageRange {
                start: parse_page_ref(s)?,
                end: None,
            })
        }
    }

    /// Inclusive 1-based bounds, lowest first.
    pub fn bounds(&self, total_pages: u32) -> Result<(u32, u32)> {
        let resolve = |page: &PageRef| match page {
            PageRef::Number(n) => *n,
            PageRef::End => total_pages,
        };
        let start = resolve(&self.start);
        let end = self.end.as_ref().map(resolve).unwrap_or(start);

        if start == 0 || end == 0 {
            return Err(anyhow!("Page numbers must be >= 1"));
        }
        for page in [start, end] {
            if page > total_pages {
                return Err(anyhow!(
                    "Page {} exceeds total pages {}",
                    page,
                    total_pages
                ));
            }
        }
        Ok((start.min(end), start.max(end)))
    }

    /// Expand this range into a list of 1-based page numbers, in the written direction
    pub fn expand(&self, total_pages: u32) -> Result<Vec<u32>> {
        let (low, high) = self.bounds(total_pages)?;
        let descending = matches!(
            (&self.start, &self.end),
            (PageRef::Number(a), Some(PageRef::Number(b))) if a > b
        ) || matches!((&self.start, &self.end), (PageRef::End, Some(PageRef::Number(_))));
        if descending {
            Ok((low..=high).rev().collect())
        } else {
            Ok((low..=high).collect())
        }
    }
}

fn parse_page_ref(s: &str) -> Result<PageRef> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("end") {
        Ok(PageRef::End)
    } else {
        s.parse::<u32>()
            .map(PageRef::Number)
            .map_err(|_| anyhow!("Invalid page number: {}", s))
    }
}

/// Parse a comma-separated list of page ranges like "1-5,10,15-end"
pub fn parse_page_ranges(s: &str) -> Result<Vec<PageRange>> {
    s.split(',')
        .map(|part| PageRange::parse(part.trim()))
        .collect()
}

/// Expand a page range string into a list of 1-based page numbers
pub fn expand_page_ranges(s: &str, total_pages: u32) -> Result<Vec<u32>> {
    let ranges = parse_page_ranges(s)?;
    let mut pages = Vec::new();
    for range in ranges {
        pages.extend(range.expand(total_pages)?);
    }
    Ok(pages)
}

/// Inclusive bounds of each range in a list such as "3-4,6", as used for ToC page spans.
pub fn page_spans(s: &str, total_pages: u32) -> Result<Vec<(i64, i64)>> {
    parse_page_ranges(s)?
        .iter()
        .map(|range| {
            let (low, high) = range.bounds(total_pages)?;
            Ok((i64::from(low), i64::from(high)))
        })
        .collect()
}
