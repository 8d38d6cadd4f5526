//! Existing-page discovery: walks the paged listing endpoint and builds the
//! lookup tables that connect DocFX identities to Confluence page ids.

use std::collections::{BTreeMap, VecDeque};

use anyhow::{Result, bail};
use serde::Serialize;

use crate::client::{ConfluenceApi, PageRecord, StoreError};

pub const LISTING_PAGE_SIZE: usize = 50;

/// One already-published page: the `(docfx_uid, docfx_href, confluence_id)`
/// triple extracted from a listing record's metadata property.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PageMapping {
    #[serde(rename = "confluence_id")]
    pub page_id: String,
    #[serde(rename = "docfx_uid")]
    pub uid: String,
    #[serde(rename = "docfx_href")]
    pub href: String,
}

/// Lazy walk over the paged listing. Fetches one batch at a time with a
/// fixed page size, stopping when the server reports an empty batch. The
/// sequence is single-pass; the first failed fetch ends it.
pub struct PagedListing<'a, C: ConfluenceApi> {
    api: &'a mut C,
    space_key: Option<String>,
    offset: usize,
    buffer: VecDeque<PageRecord>,
    finished: bool,
}

impl<'a, C: ConfluenceApi> PagedListing<'a, C> {
    pub fn new(api: &'a mut C, space_key: Option<&str>) -> Self {
        Self {
            api,
            space_key: space_key.map(ToString::to_string),
            offset: 0,
            buffer: VecDeque::new(),
            finished: false,
        }
    }
}

impl<C: ConfluenceApi> Iterator for PagedListing<'_, C> {
    type Item = Result<PageRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }

            match self
                .api
                .list_page(self.space_key.as_deref(), self.offset, LISTING_PAGE_SIZE)
            {
                Ok(batch) => {
                    if batch.size == 0 {
                        self.finished = true;
                        return None;
                    }
                    self.offset += LISTING_PAGE_SIZE;
                    self.buffer.extend(batch.results);
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Walk the full listing and keep the pages that carry DocFX metadata.
/// Pages that did not originate from the publish pipeline are skipped.
pub fn collect_mappings<C: ConfluenceApi>(
    api: &mut C,
    space_key: Option<&str>,
) -> Result<Vec<PageMapping>, StoreError> {
    let mut mappings = Vec::new();
    for record in PagedListing::new(api, space_key) {
        let record = record?;
        let Some(content) = record.docfx_content() else {
            continue;
        };
        mappings.push(PageMapping {
            page_id: record.id.clone(),
            uid: content.uid.clone(),
            href: content.href.clone(),
        });
    }
    Ok(mappings)
}

/// In-memory lookup tables for one reconciliation run: `uid -> page id` and
/// `normalized href -> page id`.
#[derive(Debug, Default, Clone)]
pub struct MappingIndex {
    uid_to_id: BTreeMap<String, String>,
    href_to_id: BTreeMap<String, String>,
}

impl MappingIndex {
    /// Build both tables. Duplicate uids or hrefs across wiki pages are
    /// rejected outright rather than letting an arbitrary record win.
    pub fn from_mappings(mappings: &[PageMapping]) -> Result<Self> {
        let mut index = Self::default();
        for mapping in mappings {
            if index
                .uid_to_id
                .insert(mapping.uid.clone(), mapping.page_id.clone())
                .is_some()
            {
                bail!(
                    "duplicate DocFX UID '{}' across Confluence pages; \
                     remove the stale page before publishing",
                    mapping.uid
                );
            }
            if index
                .href_to_id
                .insert(normalize_href(&mapping.href).to_string(), mapping.page_id.clone())
                .is_some()
            {
                bail!(
                    "duplicate DocFX href '{}' across Confluence pages; \
                     remove the stale page before publishing",
                    mapping.href
                );
            }
        }
        Ok(index)
    }

    /// Register a freshly created page in both tables so that later lookups
    /// in the same run resolve it.
    pub fn register(&mut self, uid: &str, href: &str, page_id: &str) {
        self.uid_to_id.insert(uid.to_string(), page_id.to_string());
        self.href_to_id
            .insert(normalize_href(href).to_string(), page_id.to_string());
    }

    pub fn page_id_for_uid(&self, uid: &str) -> Option<&str> {
        self.uid_to_id.get(uid).map(String::as_str)
    }

    pub fn page_id_for_href(&self, href: &str) -> Option<&str> {
        self.href_to_id.get(normalize_href(href)).map(String::as_str)
    }

    pub fn hrefs(&self) -> &BTreeMap<String, String> {
        &self.href_to_id
    }

    pub fn len(&self) -> usize {
        self.uid_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uid_to_id.is_empty()
    }
}

/// Href keys drop a single leading separator; lookups must normalize the
/// same way.
pub fn normalize_href(href: &str) -> &str {
    href.strip_prefix('/').unwrap_or(href)
}

#[cfg(test)]
mod tests {
    use super::{
        LISTING_PAGE_SIZE, MappingIndex, PageMapping, PagedListing, collect_mappings,
        normalize_href,
    };
    use crate::client::{
        ConfluenceApi, DocfxContent, DocfxProperty, DocfxPropertyValue, InternalPage,
        ListingBatch, PageMetadata, PageProperties, PageRecord, StoreError,
    };

    fn record_with_property(id: &str, uid: &str, href: &str) -> PageRecord {
        PageRecord {
            id: id.to_string(),
            metadata: PageMetadata {
                properties: PageProperties {
                    docfx: Some(DocfxProperty {
                        value: DocfxPropertyValue {
                            content: DocfxContent {
                                uid: uid.to_string(),
                                href: href.to_string(),
                            },
                        },
                    }),
                },
            },
        }
    }

    fn record_without_property(id: &str) -> PageRecord {
        PageRecord {
            id: id.to_string(),
            metadata: PageMetadata::default(),
        }
    }

    struct ListingApi {
        batches: Vec<ListingBatch>,
        offsets: Vec<usize>,
    }

    impl ListingApi {
        fn new(batches: Vec<ListingBatch>) -> Self {
            Self {
                batches,
                offsets: Vec::new(),
            }
        }
    }

    impl ConfluenceApi for ListingApi {
        fn list_page(
            &mut self,
            _space_key: Option<&str>,
            start: usize,
            limit: usize,
        ) -> Result<ListingBatch, StoreError> {
            assert_eq!(limit, LISTING_PAGE_SIZE);
            self.offsets.push(start);
            if self.batches.is_empty() {
                return Ok(ListingBatch {
                    size: 0,
                    results: Vec::new(),
                });
            }
            Ok(self.batches.remove(0))
        }

        fn create_page(
            &mut self,
            _space_key: &str,
            _title: &str,
            _body: &str,
            _uid: &str,
            _href: &str,
        ) -> Result<String, StoreError> {
            unreachable!("listing tests never create pages")
        }

        fn read_page(&mut self, _page_id: &str) -> Result<InternalPage, StoreError> {
            unreachable!("listing tests never read pages")
        }

        fn update_page(
            &mut self,
            _page_id: &str,
            _title: &str,
            _body: &str,
            _uid: &str,
            _href: &str,
        ) -> Result<(), StoreError> {
            unreachable!("listing tests never update pages")
        }
    }

    fn full_batch(first_id: usize) -> ListingBatch {
        let results = (0..LISTING_PAGE_SIZE)
            .map(|index| record_without_property(&format!("{}", first_id + index)))
            .collect::<Vec<_>>();
        ListingBatch {
            size: results.len(),
            results,
        }
    }

    #[test]
    fn listing_walks_offsets_until_empty_batch() {
        let mut api = ListingApi::new(vec![full_batch(1000), full_batch(2000)]);
        let records = PagedListing::new(&mut api, Some("DOCS"))
            .collect::<Result<Vec<_>, _>>()
            .expect("listing");

        assert_eq!(records.len(), 100);
        assert_eq!(api.offsets, vec![0, 50, 100]);
    }

    #[test]
    fn listing_stops_immediately_on_empty_store() {
        let mut api = ListingApi::new(Vec::new());
        let records = PagedListing::new(&mut api, None)
            .collect::<Result<Vec<_>, _>>()
            .expect("listing");
        assert!(records.is_empty());
        assert_eq!(api.offsets, vec![0]);
    }

    #[test]
    fn collect_mappings_skips_pages_without_docfx_property() {
        let batch = ListingBatch {
            size: 3,
            results: vec![
                record_with_property("11", "ns.alpha", "/alpha.html"),
                record_without_property("12"),
                record_with_property("13", "ns.beta", "api/beta.html"),
            ],
        };
        let mut api = ListingApi::new(vec![batch]);
        let mappings = collect_mappings(&mut api, Some("DOCS")).expect("collect");

        assert_eq!(
            mappings,
            vec![
                PageMapping {
                    page_id: "11".to_string(),
                    uid: "ns.alpha".to_string(),
                    href: "/alpha.html".to_string(),
                },
                PageMapping {
                    page_id: "13".to_string(),
                    uid: "ns.beta".to_string(),
                    href: "api/beta.html".to_string(),
                },
            ]
        );
    }

    #[test]
    fn index_normalizes_leading_separator_in_href_keys() {
        let mappings = vec![PageMapping {
            page_id: "42".to_string(),
            uid: "ns.alpha".to_string(),
            href: "/a/b.html".to_string(),
        }];
        let index = MappingIndex::from_mappings(&mappings).expect("index");

        assert_eq!(index.page_id_for_uid("ns.alpha"), Some("42"));
        assert_eq!(index.page_id_for_href("a/b.html"), Some("42"));
        assert_eq!(index.page_id_for_href("/a/b.html"), Some("42"));
        assert_eq!(index.hrefs().get("a/b.html").map(String::as_str), Some("42"));
    }

    #[test]
    fn index_rejects_duplicate_uid() {
        let mappings = vec![
            PageMapping {
                page_id: "1".to_string(),
                uid: "ns.alpha".to_string(),
                href: "/a.html".to_string(),
            },
            PageMapping {
                page_id: "2".to_string(),
                uid: "ns.alpha".to_string(),
                href: "/b.html".to_string(),
            },
        ];
        let error = MappingIndex::from_mappings(&mappings).expect_err("must reject");
        assert!(error.to_string().contains("duplicate DocFX UID 'ns.alpha'"));
    }

    #[test]
    fn index_rejects_duplicate_href_after_normalization() {
        let mappings = vec![
            PageMapping {
                page_id: "1".to_string(),
                uid: "ns.alpha".to_string(),
                href: "/a.html".to_string(),
            },
            PageMapping {
                page_id: "2".to_string(),
                uid: "ns.beta".to_string(),
                href: "a.html".to_string(),
            },
        ];
        let error = MappingIndex::from_mappings(&mappings).expect_err("must reject");
        assert!(error.to_string().contains("duplicate DocFX href"));
    }

    #[test]
    fn register_makes_new_page_visible_in_both_tables() {
        let mut index = MappingIndex::default();
        index.register("ns.gamma", "/c/d.html", "77");
        assert_eq!(index.page_id_for_uid("ns.gamma"), Some("77"));
        assert_eq!(index.page_id_for_href("c/d.html"), Some("77"));
        assert_eq!(index.len(), 1);
        assert!(!index.is_empty());
    }

    #[test]
    fn normalize_href_strips_a_single_leading_separator() {
        assert_eq!(normalize_href("/a/b.html"), "a/b.html");
        assert_eq!(normalize_href("a/b.html"), "a/b.html");
        assert_eq!(normalize_href("//a.html"), "/a.html");
    }
}
