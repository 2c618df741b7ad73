//! Open-document bookkeeping for one server generation.
//!
//! The first sync of a document sends `textDocument/didOpen` at version 1;
//! later syncs with changed contents send a full-text
//! `textDocument/didChange` with the next version. Unchanged contents send
//! nothing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::{Value, json};

/// The notification needed to bring the server up to date, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    Open { method: &'static str, params: Value },
    Change { method: &'static str, params: Value },
    Unchanged,
}

impl SyncAction {
    pub fn into_notification(self) -> Option<(&'static str, Value)> {
        match self {
            SyncAction::Open { method, params } | SyncAction::Change { method, params } => {
                Some((method, params))
            }
            SyncAction::Unchanged => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackedDocument {
    version: i32,
    fingerprint: u64,
}

#[derive(Debug, Default)]
pub struct DocumentTracker {
    documents: DashMap<String, TrackedDocument>,
}

fn fingerprint(contents: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    hasher.finish()
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `contents` for `uri` and return the notification to send.
    pub fn sync(&self, uri: &str, language_id: &str, contents: &str) -> SyncAction {
        let fingerprint = fingerprint(contents);
        match self.documents.entry(uri.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(TrackedDocument {
                    version: 1,
                    fingerprint,
                });
                SyncAction::Open {
                    method: "textDocument/didOpen",
                    params: json!({
                        "textDocument": {
                            "uri": uri,
                            "languageId": language_id,
                            "version": 1,
                            "text": contents
                        }
                    }),
                }
            }
            Entry::Occupied(mut occupied) => {
                let document = occupied.get_mut();
                if document.fingerprint == fingerprint {
                    return SyncAction::Unchanged;
                }
                document.version += 1;
                document.fingerprint = fingerprint;
                SyncAction::Change {
                    method: "textDocument/didChange",
                    params: json!({
                        "textDocument": { "uri": uri, "version": document.version },
                        "contentChanges": [{ "text": contents }]
                    }),
                }
            }
        }
    }

    /// Forget a document; returns the `didClose` params if it was open.
    pub fn close(&self, uri: &str) -> Option<Value> {
        self.documents
            .remove(uri)
            .map(|_| json!({ "textDocument": { "uri": uri } }))
    }

    pub fn version(&self, uri: &str) -> Option<i32> {
        self.documents.get(uri).map(|d| d.version)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn clear(&self) {
        self.documents.clear();
    }
}
