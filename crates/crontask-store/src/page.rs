use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// Cursor-based page selector for index iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Hex-encoded index key of the last item of the previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// 0 selects [`DEFAULT_PAGE_LIMIT`].
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub reverse: bool,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn after(cursor: impl Into<String>, limit: usize) -> Self {
        Self {
            cursor: Some(cursor.into()),
            limit,
            reverse: false,
        }
    }

    pub fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.limit
        }
    }

    /// Decodes the cursor and checks that it lies under `prefix`.
    pub fn decode_cursor(&self, prefix: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(cursor) = &self.cursor else {
            return Ok(None);
        };
        if cursor.is_empty() {
            return Ok(None);
        }
        let raw = hex::decode(cursor).map_err(|e| StoreError::InvalidCursor(e.to_string()))?;
        if !raw.starts_with(prefix) {
            return Err(StoreError::InvalidCursor(
                "cursor belongs to a different index".into(),
            ));
        }
        Ok(Some(raw))
    }
}

/// One page of results. `next_cursor` is `None` on the last page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}
