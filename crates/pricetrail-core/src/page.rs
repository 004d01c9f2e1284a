//! Pagination parameters and result metadata.

use serde::Serialize;

const MAX_PAGE_SIZE: i64 = 100;
const DEFAULT_PAGE_SIZE: i64 = 20;

/// Clamped pagination request: `page >= 1`, `page_size` in `1..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: i64,
    page_size: i64,
}

impl Page {
    #[must_use]
    pub fn new(page: i64, page_size: i64) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    #[must_use]
    pub fn from_params(page: Option<i64>, page_size: Option<i64>) -> Self {
        Self::new(page.unwrap_or(1), page_size.unwrap_or(DEFAULT_PAGE_SIZE))
    }

    #[must_use]
    pub const fn page(self) -> i64 {
        self.page
    }

    #[must_use]
    pub const fn page_size(self) -> i64 {
        self.page_size
    }

    #[must_use]
    pub const fn offset(self) -> i64 {
        (self.page - 1) * self.page_size
    }

    /// Combines this request with the total matching count into response
    /// metadata.
    #[must_use]
    pub fn info(self, total: i64) -> PageInfo {
        let total = total.max(0);
        let total_pages = (total + self.page_size - 1) / self.page_size;
        PageInfo {
            total,
            page: self.page,
            page_size: self.page_size,
            total_pages,
            has_next: self.page < total_pages,
            has_prev: self.page > 1,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

/// Pagination block returned alongside a page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_to_bounds() {
        let page = Page::new(0, 500);
        assert_eq!(page.page(), 1);
        assert_eq!(page.page_size(), 100);

        let page = Page::new(-3, 0);
        assert_eq!(page.page(), 1);
        assert_eq!(page.page_size(), 1);
    }

    #[test]
    fn offset_skips_previous_pages() {
        assert_eq!(Page::new(1, 20).offset(), 0);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }

    #[test]
    fn info_computes_ceiling_page_count() {
        let info = Page::new(1, 20).info(41);
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next);
        assert!(!info.has_prev);
    }

    #[test]
    fn info_exact_multiple_has_no_partial_page() {
        let info = Page::new(2, 20).info(40);
        assert_eq!(info.total_pages, 2);
        assert!(!info.has_next);
        assert!(info.has_prev);
    }

    #[test]
    fn info_empty_result_has_zero_pages() {
        let info = Page::new(1, 20).info(0);
        assert_eq!(info.total_pages, 0);
        assert!(!info.has_next);
        assert!(!info.has_prev);
    }

    #[test]
    fn from_params_applies_defaults() {
        let page = Page::from_params(None, None);
        assert_eq!(page.page(), 1);
        assert_eq!(page.page_size(), DEFAULT_PAGE_SIZE);
    }
}
