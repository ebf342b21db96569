//! A single feed entry and the operations scoped to its identifier.
use crate::connection::{Connection, Method};
use crate::error::ApiError;
use serde::Deserialize;
use std::sync::Arc;

const STATE_PREFIX: &str = "user/-/state/com.google/";

/// The item states an edit action can apply or remove.
///
/// Each variant maps to a fixed wire-level tag; the apply/remove polarity is
/// chosen by the edit request, not the tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateTag {
    Read,
    Starred,
    Liked,
    Shared,
}

impl StateTag {
    /// The tag name as it appears on the wire.
    pub fn wire_name(self) -> &'static str {
        match self {
            StateTag::Read => "read",
            StateTag::Starred => "starred",
            StateTag::Liked => "like",
            StateTag::Shared => "broadcast",
        }
    }

    /// The full stream id, e.g. `user/-/state/com.google/read`.
    pub fn stream_id(self) -> String {
        format!("{STATE_PREFIX}{}", self.wire_name())
    }
}

/// Detail fields of an item, fetched as one unit by [`Item::get_details`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemDetails {
    pub title: String,
    pub content: String,
    pub href: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    #[serde(default)]
    items: Vec<ItemPayload>,
}

#[derive(Debug, Deserialize)]
struct ItemPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: Summary,
    #[serde(default)]
    alternate: Vec<Alternate>,
}

#[derive(Debug, Default, Deserialize)]
struct Summary {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Alternate {
    href: String,
}

/// Handle to one remote feed entry.
///
/// The identifier is immutable after construction; detail fields are absent
/// until [`get_details`](Item::get_details) succeeds and are then set as one
/// unit. An `Item` is a disposable handle, not a cached record.
#[derive(Debug)]
pub struct Item {
    id: String,
    connection: Arc<Connection>,
    details: Option<ItemDetails>,
}

impl Item {
    /// Create a handle for a known item id on the given connection.
    pub fn new(connection: Arc<Connection>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connection,
            details: None,
        }
    }

    /// The opaque identifier assigned by the remote service.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The detail fields, if [`get_details`](Item::get_details) has succeeded.
    pub fn details(&self) -> Option<&ItemDetails> {
        self.details.as_ref()
    }

    pub fn title(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.title.as_str())
    }

    pub fn content(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.content.as_str())
    }

    pub fn href(&self) -> Option<&str> {
        self.details.as_ref().map(|d| d.href.as_str())
    }

    pub async fn mark_as_read(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Read, false, None).await
    }

    pub async fn mark_as_unread(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Read, true, None).await
    }

    pub async fn mark_as_starred(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Starred, false, None).await
    }

    pub async fn remove_starred_mark(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Starred, true, None).await
    }

    pub async fn mark_as_liked(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Liked, false, None).await
    }

    pub async fn remove_liked_mark(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Liked, true, None).await
    }

    pub async fn mark_as_shared(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Shared, false, None).await
    }

    /// Share the item with a free-text note attached.
    pub async fn mark_as_shared_with_note(&self, note: &str) -> Result<(), ApiError> {
        self.edit(StateTag::Shared, false, Some(("annotation", note)))
            .await
    }

    pub async fn remove_shared_mark(&self) -> Result<(), ApiError> {
        self.edit(StateTag::Shared, true, None).await
    }

    /// POST an edit action for this item.
    ///
    /// `undo` selects the remove (`r=`) form instead of apply (`a=`). The
    /// API returns no guaranteed body for edits, so success is simply the
    /// absence of an error.
    async fn edit(
        &self,
        tag: StateTag,
        undo: bool,
        extra: Option<(&str, &str)>,
    ) -> Result<(), ApiError> {
        let action = if undo { "r" } else { "a" };
        let mut params: Vec<(&str, String)> =
            vec![("i", self.id.clone()), (action, tag.stream_id())];
        if let Some((key, value)) = extra {
            params.push((key, value.to_string()));
        }

        let url = self.connection.endpoint("edit-tag")?;
        self.connection.make_request(url, &params, Method::Post).await?;
        tracing::debug!(item = %self.id, tag = tag.wire_name(), undo = undo, "Edited item state");
        Ok(())
    }

    /// Fetch title, summary content, and canonical link for this item.
    ///
    /// Sets all detail fields in one step and returns a reference to them;
    /// on any error the fields are left untouched.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NotFound`] if the response's item list is empty
    /// - [`ApiError::MalformedResponse`] if the body is missing, undecodable,
    ///   or carries no alternate link
    pub async fn get_details(&mut self) -> Result<&ItemDetails, ApiError> {
        let url = self.connection.endpoint("stream/items/contents")?;
        let params = vec![("i", self.id.clone())];
        let body = self
            .connection
            .make_request(url, &params, Method::Get)
            .await?
            .ok_or_else(|| {
                ApiError::MalformedResponse("contents response has no body".into())
            })?;

        let mut response: ContentsResponse = serde_json::from_value(body)
            .map_err(|e| ApiError::MalformedResponse(format!("contents response: {e}")))?;
        if response.items.is_empty() {
            return Err(ApiError::NotFound(self.id.clone()));
        }

        let payload = response.items.remove(0);
        let href = payload
            .alternate
            .into_iter()
            .next()
            .map(|a| a.href)
            .ok_or_else(|| {
                ApiError::MalformedResponse("contents item has no alternate link".into())
            })?;

        Ok(self.details.insert(ItemDetails {
            title: payload.title,
            content: payload.summary.content,
            href,
        }))
    }
}
