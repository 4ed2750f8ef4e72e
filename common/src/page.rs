//! Limit/offset pagination for newest-first listings.

use serde::{Deserialize, Serialize};

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Default page size for per-user listings.
pub const DEFAULT_USER_PAGE_LIMIT: usize = 20;

/// Default page size for administrative listings.
pub const DEFAULT_ADMIN_PAGE_LIMIT: usize = 50;

/// A window over a newest-first sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum number of items to return, in `1..=MAX_PAGE_LIMIT`.
    pub limit: usize,
    /// Number of items to skip from the newest end.
    pub offset: usize,
}

impl Page {
    /// Create a page, clamping the limit into `1..=MAX_PAGE_LIMIT`.
    pub fn new(limit: usize, offset: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            offset,
        }
    }

    /// First page with the per-user default size.
    pub fn user_default() -> Self {
        Self::new(DEFAULT_USER_PAGE_LIMIT, 0)
    }

    /// First page with the administrative default size.
    pub fn admin_default() -> Self {
        Self::new(DEFAULT_ADMIN_PAGE_LIMIT, 0)
    }

    /// The page following this one.
    pub fn next(&self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset + self.limit,
        }
    }

    /// Apply the window to an iterator that already yields newest first.
    pub fn slice<T, I>(&self, items: I) -> Vec<T>
    where
        I: IntoIterator<Item = T>,
    {
        items
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::user_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(Page::new(0, 0).limit, 1);
        assert_eq!(Page::new(500, 0).limit, MAX_PAGE_LIMIT);
        assert_eq!(Page::new(10, 3).offset, 3);
    }

    #[test]
    fn test_slice_is_restartable() {
        let items: Vec<u32> = (0..25).rev().collect();
        let first = Page::new(10, 0);

        assert_eq!(first.slice(items.clone()), (15..25).rev().collect::<Vec<_>>());
        assert_eq!(first.next().slice(items.clone()), (5..15).rev().collect::<Vec<_>>());
        assert_eq!(first.next().next().slice(items.clone()).len(), 5);
        assert!(Page::new(10, 30).slice(items).is_empty());
    }
}
