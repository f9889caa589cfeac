//! Paging support for repository queries.
//!
//! A [`PageRequest`] selects a 1-indexed page of a given size plus optional
//! sort directives; a [`Page`] carries the items of that page along with the
//! total number of matching documents. The total and the items are fetched
//! in two separate round trips, so they may disagree under concurrent writes.

use serde::{Deserialize, Serialize};

use crate::query::{Sort, SortDirection};

/// A single page of results.
///
/// # Type Parameters
///
/// * `T` - The type of items contained in this page
///
/// # Example
///
/// ```ignore
/// use docmapper::page::Page;
///
/// let page: Page<String> = Page::builder(vec!["item1".to_string()])
///     .with_count(100)
///     .with_next_page(Some(2))
///     .build();
///
/// assert_eq!(page.items.len(), 1);
/// assert_eq!(page.count, 100);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// The items contained in this page.
    pub items: Vec<T>,
    /// Total count of matching documents across all pages.
    pub count: u64,
    /// The next page number (if more pages exist).
    pub next_page: Option<usize>,
    /// The previous page number (if this is not the first page).
    pub previous_page: Option<usize>,
}

impl<T> Page<T> {
    /// Creates a new builder for constructing a page with custom settings.
    pub fn builder(items: Vec<T>) -> PageBuilder<T> {
        PageBuilder::new(items)
    }

    /// Assembles the page `request` selected out of `total` matching documents.
    pub fn from_total(items: Vec<T>, total: u64, request: &PageRequest) -> Self {
        let end = request.offset().saturating_add(items.len()) as u64;

        Page::builder(items)
            .with_count(total)
            .with_next_page((end < total).then_some(request.page + 1))
            .with_previous_page((request.page > 1).then(|| request.page - 1))
            .build()
    }

    /// Transforms the items while keeping the paging metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }
}

/// Builder for constructing [`Page`] instances with fluent API.
pub struct PageBuilder<T> {
    items: Vec<T>,
    count: u64,
    next_page: Option<usize>,
    previous_page: Option<usize>,
}

impl<T> PageBuilder<T> {
    /// Creates a new builder with the given items.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            count: 0,
            next_page: None,
            previous_page: None,
        }
    }

    /// Sets the total count of matching documents.
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Sets the next page number (or `None` if this is the last page).
    pub fn with_next_page(mut self, next_page: Option<usize>) -> Self {
        self.next_page = next_page;
        self
    }

    /// Sets the previous page number (or `None` if this is the first page).
    pub fn with_previous_page(mut self, previous_page: Option<usize>) -> Self {
        self.previous_page = previous_page;
        self
    }

    /// Builds and returns the final [`Page`] instance.
    pub fn build(self) -> Page<T> {
        Page {
            items: self.items,
            count: self.count,
            next_page: self.next_page,
            previous_page: self.previous_page,
        }
    }
}

/// Which page to fetch, how large it is and how it is ordered.
///
/// Pages are 1-indexed (page 1 is the first page); a page number of 0 is
/// treated as page 1.
///
/// # Example
///
/// ```ignore
/// use docmapper::page::PageRequest;
///
/// let request = PageRequest::new(3, 20);
/// assert_eq!(request.offset(), 40);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// The page number (1-indexed).
    pub page: usize,
    /// Number of items per page.
    pub per_page: usize,
    /// Sort directives applied before paging.
    pub sort: Vec<Sort>,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page,
            sort: Vec::new(),
        }
    }

    /// Creates a new builder for constructing page requests.
    pub fn builder() -> PageRequestBuilder {
        PageRequestBuilder::new()
    }

    /// Calculates the number of items to skip for this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

/// Builder for [`PageRequest`] instances.
///
/// Unset values default to page 1 with 10 items per page.
#[derive(Default)]
pub struct PageRequestBuilder {
    page: Option<usize>,
    per_page: Option<usize>,
    sort: Vec<Sort>,
}

impl PageRequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn build(self) -> PageRequest {
        PageRequest {
            sort: self.sort,
            ..PageRequest::new(self.page.unwrap_or(1), self.per_page.unwrap_or(10))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_one_indexed() {
        assert_eq!(PageRequest::new(1, 20).offset(), 0);
        assert_eq!(PageRequest::new(3, 20).offset(), 40);
        assert_eq!(PageRequest::new(0, 20).offset(), 0);
    }

    #[test]
    fn offsets_saturate_on_huge_pages() {
        assert_eq!(PageRequest::new(usize::MAX, 20).offset(), usize::MAX);
        assert_eq!(PageRequest::new(usize::MAX, 0).offset(), 0);
    }

    #[test]
    fn navigation_follows_the_total() {
        let request = PageRequest::new(2, 10);

        let middle = Page::from_total(vec![0; 10], 35, &request);
        assert_eq!(middle.next_page, Some(3));
        assert_eq!(middle.previous_page, Some(1));

        let last = Page::from_total(vec![0; 10], 20, &request);
        assert_eq!(last.next_page, None);
        assert_eq!(last.count, 20);
    }

    #[test]
    fn builder_defaults_and_sorts() {
        let request = PageRequest::builder()
            .with_per_page(5)
            .with_sort("created_at", SortDirection::Desc)
            .build();

        assert_eq!(request.page, 1);
        assert_eq!(request.per_page, 5);
        assert_eq!(request.sort, vec![Sort::desc("created_at")]);
    }
}
