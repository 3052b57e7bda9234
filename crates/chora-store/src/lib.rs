//! # Chora Store
//!
//! Browser-local data layer of the organizer: PDF documents, events built
//! from pages of those documents, and per-document annotation sets.
//!
//! Three keyed collections behind one lock:
//!
//! ```text
//! DocumentStore
//!     ├── documents    id → Document        (auto-increment ids)
//!     ├── events       id → EventRecord     (auto-increment ids)
//!     └── annotations  document id → AnnotationSet
//! ```
//!
//! Deleting a document cascades: its pages disappear from every event and
//! its annotation set is dropped, so no event ever references a document
//! that is gone.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use chora_common::{now_millis, ChoraError, Result};

// ==================== Records ====================

/// A stored PDF document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub name: String,
    /// Raw PDF bytes.
    pub data: Vec<u8>,
    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

/// One page of a document, referenced from an event's page sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub document_id: u64,
    pub page_number: u32,
}

/// An event: a named, ordered sequence of document pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub pages: Vec<PageRef>,
}

/// A 2D point in page coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One annotation on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub page: u32,
    #[serde(flatten)]
    pub kind: AnnotationKind,
}

/// Annotation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Freehand stroke.
    Path { points: Vec<Point> },
    /// Sticky note.
    Note { position: Point, text: String },
}

/// All annotations of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationSet {
    pub document_id: u64,
    pub entries: Vec<Annotation>,
}

// ==================== Store ====================

#[derive(Default)]
struct Inner {
    documents: HashMap<u64, Document>,
    events: HashMap<u64, EventRecord>,
    annotations: HashMap<u64, AnnotationSet>,
    next_document_id: u64,
    next_event_id: u64,
}

/// The organizer's data store. Cloning is cheap; every clone operates on the
/// same collections.
#[derive(Clone, Default)]
pub struct DocumentStore {
    inner: Arc<RwLock<Inner>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Documents ====================

    /// Store a new document and return its id.
    pub async fn put_document(&self, name: impl Into<String>, data: Vec<u8>) -> u64 {
        let mut inner = self.inner.write().await;
        inner.next_document_id += 1;
        let id = inner.next_document_id;
        let name = name.into();
        info!(id, name = %name, bytes = data.len(), "document stored");
        inner.documents.insert(
            id,
            Document {
                id,
                name,
                data,
                stored_at: now_millis(),
            },
        );
        id
    }

    pub async fn get_document(&self, id: u64) -> Option<Document> {
        self.inner.read().await.documents.get(&id).cloned()
    }

    /// All documents, sorted by name.
    pub async fn list_documents(&self) -> Vec<Document> {
        let inner = self.inner.read().await;
        let mut docs: Vec<Document> = inner.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.name.cmp(&b.name));
        docs
    }

    /// Delete a document and everything that references it. Returns whether
    /// it existed.
    pub async fn delete_document(&self, id: u64) -> bool {
        let mut inner = self.inner.write().await;
        if inner.documents.remove(&id).is_none() {
            return false;
        }

        for event in inner.events.values_mut() {
            let before = event.pages.len();
            event.pages.retain(|p| p.document_id != id);
            if event.pages.len() < before {
                debug!(event = event.id, document = id, removed = before - event.pages.len(),
                    "dropped pages of deleted document from event");
            }
        }
        inner.annotations.remove(&id);

        info!(id, "document deleted");
        true
    }

    // ==================== Events ====================

    /// Create an event and return its id.
    pub async fn create_event(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        pages: Vec<PageRef>,
    ) -> u64 {
        let mut inner = self.inner.write().await;
        inner.next_event_id += 1;
        let id = inner.next_event_id;
        inner.events.insert(
            id,
            EventRecord {
                id,
                name: name.into(),
                description: description.into(),
                pages,
            },
        );
        id
    }

    /// Replace an existing event wholesale (rename, reorder, edit pages).
    pub async fn update_event(&self, event: EventRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.events.contains_key(&event.id) {
            return Err(ChoraError::NotFound(format!("event {}", event.id)));
        }
        inner.events.insert(event.id, event);
        Ok(())
    }

    pub async fn get_event(&self, id: u64) -> Option<EventRecord> {
        self.inner.read().await.events.get(&id).cloned()
    }

    /// All events, sorted by name.
    pub async fn list_events(&self) -> Vec<EventRecord> {
        let inner = self.inner.read().await;
        let mut events: Vec<EventRecord> = inner.events.values().cloned().collect();
        events.sort_by(|a, b| a.name.cmp(&b.name));
        events
    }

    pub async fn delete_event(&self, id: u64) -> bool {
        self.inner.write().await.events.remove(&id).is_some()
    }

    /// Append a page to an event's sequence. A page already present is not
    /// added twice; returns whether the sequence changed.
    pub async fn add_page_to_event(&self, event_id: u64, page: PageRef) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.documents.contains_key(&page.document_id) {
            return Err(ChoraError::NotFound(format!(
                "document {}",
                page.document_id
            )));
        }
        let event = inner
            .events
            .get_mut(&event_id)
            .ok_or_else(|| ChoraError::NotFound(format!("event {event_id}")))?;
        if event.pages.contains(&page) {
            return Ok(false);
        }
        event.pages.push(page);
        Ok(true)
    }

    // ==================== Annotations ====================

    /// Replace the annotation set of a document.
    pub async fn save_annotations(&self, document_id: u64, entries: Vec<Annotation>) {
        let mut inner = self.inner.write().await;
        inner.annotations.insert(
            document_id,
            AnnotationSet {
                document_id,
                entries,
            },
        );
    }

    /// All annotations of a document, empty if none were ever saved.
    pub async fn annotations_for(&self, document_id: u64) -> Vec<Annotation> {
        self.inner
            .read()
            .await
            .annotations
            .get(&document_id)
            .map(|set| set.entries.clone())
            .unwrap_or_default()
    }

    /// Annotations of one page of a document.
    pub async fn annotations_for_page(&self, document_id: u64, page: u32) -> Vec<Annotation> {
        let mut entries = self.annotations_for(document_id).await;
        entries.retain(|a| a.page == page);
        entries
    }
}

// ==================== Tests ====================
