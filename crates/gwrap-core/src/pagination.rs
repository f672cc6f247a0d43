//! Continuation-token page collection.
//!
//! Every list-type operation in this workspace calls a listing endpoint with a
//! page token, appends the returned items, and loops while the provider hands
//! back a new token. [`PageCollector`] owns that loop so the services only have
//! to describe how to fetch one page.

use tracing::{debug, trace};

use crate::error::{ApiError, ApiResult};

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in provider order.
    pub items: Vec<T>,
    /// Continuation token for the next page; `None` ends the listing.
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Creates a page that is the last of its listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    /// Creates a page followed by another one.
    pub fn with_next(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(token.into()),
        }
    }

    /// Returns the continuation token, treating an empty token as absent.
    fn continuation(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Drives a listing operation until the provider stops returning page tokens.
///
/// The collected output is always the concatenation of each page's items in
/// the order the pages were fetched. By default the loop is unbounded, so a
/// provider that never stops returning tokens loops forever; set
/// [`PageCollector::with_max_pages`] to turn that into an error instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageCollector {
    max_pages: Option<usize>,
}

impl PageCollector {
    /// Creates an unbounded collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of pages fetched by a single collection.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Returns the page cap, if any.
    pub fn max_pages(&self) -> Option<usize> {
        self.max_pages
    }

    /// Collects every page.
    ///
    /// `fetch` receives `None` for the first page and the provider's token for
    /// each following one. The first error aborts the collection; the items
    /// gathered so far are discarded.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` fails with, or a remote service error when the
    /// page cap is exceeded.
    pub fn collect<T, F>(&self, mut fetch: F) -> ApiResult<Vec<T>>
    where
        F: FnMut(Option<&str>) -> ApiResult<Page<T>>,
    {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            if let Some(max) = self.max_pages
                && pages >= max
            {
                return Err(ApiError::remote(format!(
                    "listing did not terminate after {} pages",
                    max
                )));
            }

            let page = fetch(token.as_deref())?;
            pages += 1;
            trace!("page {} returned {} items", pages, page.items.len());

            let next = page.continuation().map(str::to_owned);
            items.extend(page.items);

            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!("collected {} items over {} pages", items.len(), pages);
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(pages: Vec<Page<u32>>) -> impl FnMut(Option<&str>) -> ApiResult<Page<u32>> {
        let mut pages = pages.into_iter();
        move |_| pages.next().ok_or_else(|| ApiError::remote("script exhausted"))
    }

    #[test]
    fn single_page() {
        let out = PageCollector::new()
            .collect(scripted(vec![Page::last(vec![1, 2, 3])]))
            .unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn pages_concatenate_in_fetch_order() {
        let pages = vec![
            Page::with_next(vec![5, 1], "a"),
            Page::with_next(vec![], "b"),
            Page::with_next(vec![9], "c"),
            Page::last(vec![2, 2]),
        ];
        let out = PageCollector::new().collect(scripted(pages)).unwrap();
        assert_eq!(out, vec![5, 1, 9, 2, 2]);
    }

    #[test]
    fn tokens_are_passed_back() {
        let mut seen = Vec::new();
        let out = PageCollector::new()
            .collect(|token| {
                seen.push(token.map(str::to_owned));
                Ok(match token {
                    None => Page::with_next(vec!["first"], "t1"),
                    Some("t1") => Page::with_next(vec!["second"], "t2"),
                    _ => Page::last(vec!["third"]),
                })
            })
            .unwrap();

        assert_eq!(out, vec!["first", "second", "third"]);
        assert_eq!(
            seen,
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[test]
    fn empty_token_ends_listing() {
        let mut calls = 0;
        let out = PageCollector::new()
            .collect(|_| {
                calls += 1;
                Ok(Page::with_next(vec![calls], ""))
            })
            .unwrap();
        assert_eq!(out, vec![1]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn error_aborts_collection() {
        let mut calls = 0;
        let result: ApiResult<Vec<u32>> = PageCollector::new().collect(|_| {
            calls += 1;
            if calls == 2 {
                Err(ApiError::remote("backend error").with_status(500))
            } else {
                Ok(Page::with_next(vec![calls], "next"))
            }
        });
        let err = result.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(calls, 2);
    }

    #[test]
    fn max_pages_bounds_endless_chain() {
        let mut calls = 0;
        let result: ApiResult<Vec<u32>> =
            PageCollector::new().with_max_pages(3).collect(|_| {
                calls += 1;
                Ok(Page::with_next(vec![calls], "again"))
            });
        let err = result.unwrap_err();
        assert_eq!(err.code(), crate::ApiErrorCode::RemoteService);
        assert_eq!(calls, 3);
    }

    #[test]
    fn max_pages_allows_exact_fit() {
        let out = PageCollector::new()
            .with_max_pages(2)
            .collect(scripted(vec![
                Page::with_next(vec![1], "x"),
                Page::last(vec![2]),
            ]))
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
