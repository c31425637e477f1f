use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures at the fetch boundary that the reconciler has to distinguish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("cursor no longer valid on server: {cursor}")]
    StaleCursor { cursor: String },
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn is_stale_cursor(&self) -> bool {
        matches!(self, FetchError::StaleCursor { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>, offset: usize) -> Self {
        let total = (offset + items.len()) as u64;
        Self {
            limit: items.len(),
            items,
            total,
            offset,
            has_more: false,
        }
    }
}

/// Fetches `offset`/`limit` pages until the server reports no more, or hands
/// back an empty page while still claiming `has_more`.
pub fn drain_pages<T, F>(mut fetch: F, page_size: usize) -> Result<Vec<T>, FetchError>
where
    F: FnMut(usize, usize) -> Result<Page<T>, FetchError>,
{
    let page_size = page_size.max(1);
    let mut items = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = fetch(offset, page_size)?;
        let received = page.items.len();
        let has_more = page.has_more;
        items.extend(page.items);
        if !has_more || received == 0 {
            break;
        }
        offset += received;
    }
    Ok(items)
}
