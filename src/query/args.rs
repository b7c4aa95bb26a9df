//! Operation arguments and paginated results

use serde::{Deserialize, Serialize};

use crate::storage::{Document, DocumentId, Fields};

pub const DEFAULT_LIMIT: u64 = 10;

/// Arguments of `find`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindArgs {
    pub collection: String,
    #[serde(rename = "where")]
    pub filter: serde_json::Value,
    pub sort: Option<String>,
    /// Page size; `0` returns every match on one page
    pub limit: Option<u64>,
    pub page: Option<u64>,
    /// `false` returns every match on one page
    pub pagination: bool,
    pub depth: u32,
    pub transaction: Option<String>,
}

impl Default for FindArgs {
    fn default() -> Self {
        Self {
            collection: String::new(),
            filter: serde_json::Value::Null,
            sort: None,
            limit: None,
            page: None,
            pagination: true,
            depth: 0,
            transaction: None,
        }
    }
}

impl FindArgs {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: serde_json::Value) -> Self {
        self.filter = filter;
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn without_pagination(mut self) -> Self {
        self.pagination = false;
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }

    /// Effective (limit, page). A limit of `None` means unbounded.
    pub fn window(&self) -> (Option<u64>, u64) {
        let page = self.page.unwrap_or(1).max(1);
        match self.limit.unwrap_or(DEFAULT_LIMIT) {
            0 => (None, 1),
            _ if !self.pagination => (None, 1),
            limit => (Some(limit), page),
        }
    }
}

/// Arguments of `findOne`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FindOneArgs {
    pub collection: String,
    #[serde(rename = "where")]
    pub filter: serde_json::Value,
    pub sort: Option<String>,
    pub depth: u32,
    pub transaction: Option<String>,
}

impl FindOneArgs {
    pub fn new(collection: impl Into<String>, filter: serde_json::Value) -> Self {
        Self {
            collection: collection.into(),
            filter,
            ..Self::default()
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

/// Arguments of `findByID`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindByIdArgs {
    pub collection: String,
    pub id: DocumentId,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub transaction: Option<String>,
}

impl FindByIdArgs {
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            depth: 0,
            transaction: None,
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

/// Arguments of `create`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateArgs {
    pub collection: String,
    pub data: Fields,
    pub depth: u32,
    pub transaction: Option<String>,
}

impl CreateArgs {
    pub fn new(collection: impl Into<String>, data: Fields) -> Self {
        Self {
            collection: collection.into(),
            data,
            ..Self::default()
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

/// Arguments of `update`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateArgs {
    pub collection: String,
    pub id: DocumentId,
    #[serde(default)]
    pub data: Fields,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub transaction: Option<String>,
}

impl UpdateArgs {
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>, data: Fields) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            data,
            depth: 0,
            transaction: None,
        }
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

/// Arguments of `delete`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteArgs {
    pub collection: String,
    pub id: DocumentId,
    #[serde(default)]
    pub transaction: Option<String>,
}

impl DeleteArgs {
    pub fn new(collection: impl Into<String>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            transaction: None,
        }
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

/// Arguments of `count` and `deleteMany`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhereArgs {
    pub collection: String,
    #[serde(rename = "where")]
    pub filter: serde_json::Value,
    pub transaction: Option<String>,
}

impl WhereArgs {
    pub fn new(collection: impl Into<String>, filter: serde_json::Value) -> Self {
        Self {
            collection: collection.into(),
            filter,
            transaction: None,
        }
    }

    pub fn transaction(mut self, id: impl Into<String>) -> Self {
        self.transaction = Some(id.into());
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// One page of a `find`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedDocs {
    pub docs: Vec<Document>,
    pub total_docs: u64,
    pub limit: u64,
    pub total_pages: u64,
    pub page: u64,
    pub paging_counter: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
    pub prev_page: Option<u64>,
    pub next_page: Option<u64>,
}

impl PaginatedDocs {
    /// Wrap a page of documents with its metadata. `limit` of `None`
    /// means everything was returned at once.
    pub fn new(docs: Vec<Document>, total_docs: u64, limit: Option<u64>, page: u64) -> Self {
        let Some(limit) = limit.filter(|l| *l > 0) else {
            return Self {
                docs,
                total_docs,
                limit: total_docs,
                total_pages: 1,
                page: 1,
                paging_counter: 1,
                has_prev_page: false,
                has_next_page: false,
                prev_page: None,
                next_page: None,
            };
        };

        let page = page.max(1);
        let total_pages = total_docs.div_ceil(limit);
        let has_prev_page = page > 1;
        let has_next_page = page.saturating_mul(limit) < total_docs;
        Self {
            docs,
            total_docs,
            limit,
            total_pages,
            page,
            paging_counter: (page - 1).saturating_mul(limit).saturating_add(1),
            has_prev_page,
            has_next_page,
            prev_page: has_prev_page.then(|| page - 1),
            next_page: has_next_page.then(|| page + 1),
        }
    }
}
