//! Page slicing for list endpoints.
//!
//! Out-of-range requests never fail: a missing or non-numeric page shows the
//! first page, and any number outside `1..=num_pages` (zero and negatives
//! included) shows the last one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number actually served.
    pub number: usize,
    pub num_pages: usize,
    /// Total number of items across all pages.
    pub count: usize,
    pub per_page: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Query string carrying an optional `page`.
///
/// Kept as a string so that `?page=abc` falls back to page 1 instead of
/// being rejected by the extractor.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
}

impl PageQuery {
    pub fn requested(&self) -> Option<i64> {
        self.page.as_deref().and_then(|p| p.trim().parse().ok())
    }
}

pub fn num_pages(count: usize, per_page: usize) -> usize {
    let per_page = per_page.max(1);
    count.div_ceil(per_page).max(1)
}

/// Resolves the page to serve for `requested` out of `num_pages`.
pub fn clamp_page(requested: Option<i64>, num_pages: usize) -> usize {
    match requested {
        None => 1,
        Some(n) => match usize::try_from(n) {
            Ok(n) if (1..=num_pages).contains(&n) => n,
            _ => num_pages,
        },
    }
}

pub fn paginate<T>(items: Vec<T>, requested: Option<i64>, per_page: usize) -> Page<T> {
    let per_page = per_page.max(1);
    let count = items.len();
    let num_pages = num_pages(count, per_page);
    let number = clamp_page(requested, num_pages);

    let items: Vec<T> = items
        .into_iter()
        .skip((number - 1) * per_page)
        .take(per_page)
        .collect();

    Page {
        items,
        number,
        num_pages,
        count,
        per_page,
        has_next: number < num_pages,
        has_previous: number > 1,
    }
}
