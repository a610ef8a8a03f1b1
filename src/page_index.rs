/// Maps page numbers authored against the original document onto zero-based
/// indices in the document after ToC pages were inserted.
///
/// Only build one of these once layout has finished: `inserted_count` must be the
/// number of pages actually created, not a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageIndexMapper {
    /// Added to every logical page before mapping.
    pub offset: i64,
    /// 1-based physical page where the first inserted page now sits.
    pub insert_at_page: u32,
    pub inserted_count: u32,
    /// Page count of the final document.
    pub total_pages: u32,
}

impl PageIndexMapper {
    pub fn new(offset: i64, insert_at_page: u32, inserted_count: u32, total_pages: u32) -> Self {
        PageIndexMapper {
            offset,
            insert_at_page,
            inserted_count,
            total_pages,
        }
    }

    /// Same mapping for targets whose offset was already applied.
    pub fn without_offset(self) -> Self {
        PageIndexMapper { offset: 0, ..self }
    }

    /// Zero-based index of `logical_page` in the final document, clamped to the page range.
    pub fn final_index(&self, logical_page: i64) -> usize {
        let page = logical_page + self.offset;
        let mut index = page - 1;
        if page >= i64::from(self.insert_at_page) {
            index += i64::from(self.inserted_count);
        }
        let last = i64::from(self.total_pages.saturating_sub(1));
        index.clamp(0, last) as usize
    }
}
