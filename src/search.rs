//! Paginated listing queries over the items resource.
//!
//! Each listing walks the continuation cursor until the server stops
//! returning one, accumulating item references in page-arrival order. The
//! server does not snapshot the result set, so a collection mutated during
//! pagination can yield duplicates or gaps; no deduplication is attempted.
use crate::connection::{Connection, Method};
use crate::error::ApiError;
use crate::item::{Item, StateTag};
use serde::Deserialize;
use std::sync::Arc;

const READING_LIST_STREAM: &str = "user/-/state/com.google/reading-list";
const DEFAULT_PAGE_SIZE: u32 = 1000;
const DEFAULT_MAX_PAGES: u32 = 1000;

#[derive(Debug, Deserialize)]
struct ListingPage {
    #[serde(rename = "itemRefs", default)]
    item_refs: Vec<ItemRef>,
    continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemRef {
    id: String,
}

/// Issues listing queries against a [`Connection`] and materializes the
/// results as [`Item`] handles.
///
/// Holds no result state between calls. `max_pages` caps how many page
/// requests a single listing may issue, so a server that keeps handing out
/// continuation cursors cannot pin the caller in an unbounded loop.
#[derive(Debug)]
pub struct ItemsSearch {
    connection: Arc<Connection>,
    page_size: u32,
    max_pages: u32,
}

impl ItemsSearch {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    /// Items requested per page (default: 1000).
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Maximum page requests per listing call (default: 1000).
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// All unread items (reading list minus the read state).
    pub async fn get_unread_only(&self) -> Result<Vec<Item>, ApiError> {
        self.list(READING_LIST_STREAM.to_string(), Some(StateTag::Read.stream_id()))
            .await
    }

    pub async fn get_starred_only(&self) -> Result<Vec<Item>, ApiError> {
        self.list(StateTag::Starred.stream_id(), None).await
    }

    pub async fn get_liked_only(&self) -> Result<Vec<Item>, ApiError> {
        self.list(StateTag::Liked.stream_id(), None).await
    }

    pub async fn get_shared_only(&self) -> Result<Vec<Item>, ApiError> {
        self.list(StateTag::Shared.stream_id(), None).await
    }

    /// Walk the continuation cursor for one stream filter.
    ///
    /// A failed page aborts the whole call; accumulated references are
    /// discarded rather than returned partially.
    async fn list(
        &self,
        stream: String,
        exclude: Option<String>,
    ) -> Result<Vec<Item>, ApiError> {
        let url = self.connection.endpoint("stream/items/ids")?;
        let mut ids: Vec<String> = Vec::new();
        let mut continuation: Option<String> = None;
        let mut requests = 0u32;

        loop {
            if requests >= self.max_pages {
                return Err(ApiError::PageLimitExceeded(self.max_pages));
            }
            requests += 1;

            let mut params: Vec<(&str, String)> =
                vec![("s", stream.clone()), ("n", self.page_size.to_string())];
            if let Some(xt) = &exclude {
                params.push(("xt", xt.clone()));
            }
            if let Some(c) = continuation.take() {
                params.push(("c", c));
            }

            let body = self
                .connection
                .make_request(url.clone(), &params, Method::Get)
                .await?
                .ok_or_else(|| {
                    ApiError::MalformedResponse("listing response has no body".into())
                })?;
            let page: ListingPage = serde_json::from_value(body)
                .map_err(|e| ApiError::MalformedResponse(format!("listing response: {e}")))?;

            ids.extend(page.item_refs.into_iter().map(|r| r.id));
            tracing::debug!(stream = %stream, page = requests, total = ids.len(), "Fetched listing page");

            match page.continuation {
                Some(c) => continuation = Some(c),
                None => break,
            }
        }

        Ok(ids
            .into_iter()
            .map(|id| Item::new(Arc::clone(&self.connection), id))
            .collect())
    }
}
