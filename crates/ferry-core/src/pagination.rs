//! Pagination rules shared by every listing operation.

use serde::Deserialize;

use crate::{Error, Result};

pub const MAX_PER_PAGE: i64 = 100;
pub const DEFAULT_PER_PAGE: i64 = 10;

/// A validated page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub per_page: i64,
}

impl Page {
    /// Apply defaults and limits: a missing or zero `per_page` becomes
    /// [`DEFAULT_PER_PAGE`], anything above [`MAX_PER_PAGE`] is clamped, and a
    /// negative page is rejected.
    pub fn scoped(page: Option<i64>, per_page: Option<i64>) -> Result<Self> {
        let page = page.unwrap_or(0);
        let mut per_page = per_page.unwrap_or(DEFAULT_PER_PAGE);

        if page < 0 {
            return Err(Error::invalid("invalid page"));
        }
        if per_page == 0 {
            per_page = DEFAULT_PER_PAGE;
        }
        if per_page < 0 {
            return Err(Error::invalid("invalid per page"));
        }

        Ok(Self {
            page,
            per_page: per_page.min(MAX_PER_PAGE),
        })
    }

    pub fn offset(&self) -> i64 {
        self.page * self.per_page
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

/// Query-string form of a page request.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    pub fn scoped(self) -> Result<Page> {
        Page::scoped(self.page, self.per_page)
    }
}
