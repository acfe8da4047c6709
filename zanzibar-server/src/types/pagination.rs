//! Pagination query parameters for the listing endpoints

use auth_zanzibar::PageRequest;
use serde::Deserialize;

/// `?page=&page_size=` on list endpoints.
///
/// Missing or non-positive values fall back to the defaults (page 1, 50 per
/// page); `page_size` is capped at 1000.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaginationParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PaginationParams {
    /// Get the page number (defaults to 1)
    pub fn page(&self) -> usize {
        positive(self.page).unwrap_or(1)
    }

    /// Get the page size (defaults to 50, clamped between 1 and 1000)
    pub fn page_size(&self) -> usize {
        positive(self.page_size)
            .unwrap_or(PageRequest::DEFAULT_PAGE_SIZE)
            .clamp(1, PageRequest::MAX_PAGE_SIZE)
    }

    pub fn to_request(&self) -> PageRequest {
        PageRequest::new(self.page(), self.page_size())
    }
}

fn positive(value: Option<i64>) -> Option<usize> {
    value
        .filter(|value| *value > 0)
        .and_then(|value| usize::try_from(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults() {
        let params = PaginationParams::default();
        assert_eq!(params.page(), 1);
        assert_eq!(params.page_size(), 50);
    }

    #[test]
    fn test_pagination_bounds() {
        let params = PaginationParams {
            page: Some(0),
            page_size: Some(5000),
        };
        assert_eq!(params.page(), 1);
        assert_eq!(params.page_size(), 1000);

        let params = PaginationParams {
            page: Some(-3),
            page_size: Some(-1),
        };
        assert_eq!(params.to_request(), PageRequest::new(1, 50));
    }
}
