//! HTTP handlers, grouped by resource.

pub mod calls;
pub mod events;
pub mod health;
pub mod media;
pub mod webhook;

use serde::{Deserialize, Serialize};

/// Pagination metadata for list responses.
#[derive(Serialize, Deserialize, Debug)]
pub struct PaginationMeta {
    /// Total number of items matching the query (across all pages)
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    /// True if more items are available after this page
    pub has_more: bool,
}

/// `{"data": [...], "pagination": {...}}`
#[derive(Serialize, Deserialize, Debug)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T: Serialize> ListResponse<T> {
    pub fn new(data: Vec<T>, total: usize, limit: usize, offset: usize) -> Self {
        let has_more = offset + data.len() < total;
        Self {
            data,
            pagination: PaginationMeta {
                total,
                limit,
                offset,
                has_more,
            },
        }
    }
}
