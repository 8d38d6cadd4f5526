//! Confluence page-store client: the four REST operations the publish
//! pipeline needs (paged listing, create, read, update), behind the
//! `ConfluenceApi` trait so the reconciler can be tested against mocks.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::ConfluenceConfig;

pub const DOCFX_PROPERTY_KEY: &str = "docfx";
const PROPERTY_DESCRIPTION: &str = "DocFX page properties";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Outcome taxonomy for page-store operations. Everything here is fatal to
/// the run; the caller does not retry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Confluence request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Confluence rejected the request: {0}")]
    Protocol(String),
    #[error("Confluence page {0} does not exist")]
    NotFound(String),
}

/// One batch of the paged listing protocol. `size` is the server-reported
/// record count for this batch; zero terminates the walk.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingBatch {
    pub size: usize,
    pub results: Vec<PageRecord>,
}

/// Raw page record from the listing endpoint, with the DocFX metadata
/// property expanded when the page carries one.
#[derive(Debug, Clone, Deserialize)]
pub struct PageRecord {
    pub id: String,
    #[serde(default)]
    pub metadata: PageMetadata,
}

impl PageRecord {
    pub fn docfx_content(&self) -> Option<&DocfxContent> {
        self.metadata
            .properties
            .docfx
            .as_ref()
            .map(|property| &property.value.content)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub properties: PageProperties,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageProperties {
    pub docfx: Option<DocfxProperty>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocfxProperty {
    pub value: DocfxPropertyValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocfxPropertyValue {
    pub content: DocfxContent,
}

/// The durable link between the two identity spaces, stored out-of-band on
/// each published page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocfxContent {
    #[serde(rename = "docfx_uid")]
    pub uid: String,
    #[serde(rename = "docfx_href")]
    pub href: String,
}

/// Current representation of a wiki page. `version` is the optimistic
/// concurrency token; updates must write `version + 1` of the value read.
#[derive(Debug, Clone)]
pub struct InternalPage {
    pub id: String,
    pub version: i64,
    pub space_key: String,
    pub title: String,
    pub body_storage: String,
}

pub trait ConfluenceApi {
    /// Fetch a single page of the listing, restricted to `page` resources and
    /// expanded with the DocFX metadata property.
    fn list_page(
        &mut self,
        space_key: Option<&str>,
        start: usize,
        limit: usize,
    ) -> Result<ListingBatch, StoreError>;

    /// Create a page and attach its DocFX metadata property. Returns the new
    /// page id.
    fn create_page(
        &mut self,
        space_key: &str,
        title: &str,
        body: &str,
        uid: &str,
        href: &str,
    ) -> Result<String, StoreError>;

    fn read_page(&mut self, page_id: &str) -> Result<InternalPage, StoreError>;

    /// Re-read the page for its current version, write body and title with
    /// `version + 1`, then delete and recreate the DocFX metadata property.
    /// The property replace is two sequential calls, not a transaction; a
    /// crash between them leaves the page unmapped and the next run will
    /// recreate it as a new page.
    fn update_page(
        &mut self,
        page_id: &str,
        title: &str,
        body: &str,
        uid: &str,
        href: &str,
    ) -> Result<(), StoreError>;
}

pub struct ConfluenceClient {
    client: Client,
    rest_base: String,
    username: String,
    password: String,
}

impl ConfluenceClient {
    pub fn new(config: &ConfluenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .context("failed to build Confluence HTTP client")?;
        Ok(Self {
            client,
            rest_base: config.rest_base(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.rest_base, path)
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, StoreError> {
        let response = self
            .client
            .get(self.endpoint(path))
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()?;
        Ok(response.json()?)
    }

    fn post_json(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()?;
        Ok(response.json()?)
    }

    fn put_json(&self, path: &str, body: &Value) -> Result<Value, StoreError> {
        let response = self
            .client
            .put(self.endpoint(path))
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()?;
        Ok(response.json()?)
    }

    /// DELETE with an empty response body treated as success.
    fn delete_json(&self, path: &str) -> Result<Value, StoreError> {
        let response = self
            .client
            .delete(self.endpoint(path))
            .basic_auth(&self.username, Some(&self.password))
            .send()?;
        let text = response.text()?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|error| StoreError::Protocol(format!("invalid JSON in delete response: {error}")))
    }

    fn create_property(&self, page_id: &str, uid: &str, href: &str) -> Result<(), StoreError> {
        let payload = self.post_json(
            &format!("content/{page_id}/property"),
            &json!({
                "key": DOCFX_PROPERTY_KEY,
                "value": {
                    "description": PROPERTY_DESCRIPTION,
                    "content": {
                        "docfx_uid": uid,
                        "docfx_href": href,
                    },
                },
            }),
        )?;
        if payload.get("key").is_none() {
            return Err(StoreError::Protocol(server_message(&payload)));
        }
        Ok(())
    }

    fn delete_property(&self, page_id: &str) -> Result<(), StoreError> {
        let payload =
            self.delete_json(&format!("content/{page_id}/property/{DOCFX_PROPERTY_KEY}"))?;
        if let Some(message) = payload.get("message").and_then(Value::as_str) {
            return Err(StoreError::Protocol(message.to_string()));
        }
        Ok(())
    }
}

impl ConfluenceApi for ConfluenceClient {
    fn list_page(
        &mut self,
        space_key: Option<&str>,
        start: usize,
        limit: usize,
    ) -> Result<ListingBatch, StoreError> {
        let mut query = vec![
            ("type", "page".to_string()),
            ("expand", format!("metadata.properties.{DOCFX_PROPERTY_KEY}")),
            ("start", start.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(space_key) = space_key {
            query.push(("spaceKey", space_key.to_string()));
        }

        let payload = self.get_json("content", &query)?;
        if payload.get("size").is_none() {
            return Err(StoreError::Protocol(server_message(&payload)));
        }
        serde_json::from_value(payload)
            .map_err(|error| StoreError::Protocol(format!("malformed listing payload: {error}")))
    }

    fn create_page(
        &mut self,
        space_key: &str,
        title: &str,
        body: &str,
        uid: &str,
        href: &str,
    ) -> Result<String, StoreError> {
        let payload = self.post_json(
            "content",
            &json!({
                "type": "page",
                "title": title,
                "space": { "key": space_key },
                "body": {
                    "storage": {
                        "value": body,
                        "representation": "storage",
                    },
                },
            }),
        )?;
        let page_id = match payload.get("id").and_then(Value::as_str) {
            Some(page_id) => page_id.to_string(),
            None => return Err(StoreError::Protocol(server_message(&payload))),
        };

        self.create_property(&page_id, uid, href)?;
        Ok(page_id)
    }

    fn read_page(&mut self, page_id: &str) -> Result<InternalPage, StoreError> {
        let payload = self.get_json(
            &format!("content/{page_id}"),
            &[("expand", "version,space,body.storage".to_string())],
        )?;
        if payload.get("id").is_none() {
            return Err(StoreError::NotFound(page_id.to_string()));
        }
        let page: PageResponse = serde_json::from_value(payload)
            .map_err(|error| StoreError::Protocol(format!("malformed page payload: {error}")))?;
        Ok(InternalPage {
            id: page.id,
            version: page.version.number,
            space_key: page.space.key,
            title: page.title,
            body_storage: page
                .body
                .and_then(|body| body.storage)
                .map(|storage| storage.value)
                .unwrap_or_default(),
        })
    }

    fn update_page(
        &mut self,
        page_id: &str,
        title: &str,
        body: &str,
        uid: &str,
        href: &str,
    ) -> Result<(), StoreError> {
        let page = self.read_page(page_id)?;
        let payload = self.put_json(
            &format!("content/{page_id}"),
            &json!({
                "id": page_id,
                "type": "page",
                "title": title,
                "space": { "key": page.space_key },
                "body": {
                    "storage": {
                        "value": body,
                        "representation": "storage",
                    },
                },
                "version": { "number": page.version + 1 },
            }),
        )?;
        if payload.get("id").is_none() {
            return Err(StoreError::Protocol(server_message(&payload)));
        }

        self.delete_property(page_id)?;
        self.create_property(page_id, uid, href)
    }
}

fn server_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Confluence response did not include the expected fields")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    id: String,
    title: String,
    version: PageVersion,
    space: PageSpace,
    #[serde(default)]
    body: Option<PageBody>,
}

#[derive(Debug, Deserialize)]
struct PageVersion {
    number: i64,
}

#[derive(Debug, Deserialize)]
struct PageSpace {
    key: String,
}

#[derive(Debug, Deserialize)]
struct PageBody {
    storage: Option<PageStorage>,
}

#[derive(Debug, Deserialize)]
struct PageStorage {
    value: String,
}
