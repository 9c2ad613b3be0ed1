//! Common pagination parameters for list endpoints

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters shared by paginated list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams, ToSchema)]
pub struct PaginationParams {
    /// 1-based page number
    pub page: Option<u64>,
    /// Rows per page, capped at 100
    pub page_size: Option<u64>,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: Some(1),
            page_size: Some(20),
        }
    }
}

impl PaginationParams {
    pub fn normalize(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self.page_size.unwrap_or(20).clamp(1, 100);
        (page, page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_defaults() {
        let (page, size) = PaginationParams {
            page: None,
            page_size: None,
        }
        .normalize();
        assert_eq!((page, size), (1, 20));
    }

    #[test]
    fn normalize_clamps() {
        let (page, size) = PaginationParams {
            page: Some(0),
            page_size: Some(5000),
        }
        .normalize();
        assert_eq!((page, size), (1, 100));
    }
}
