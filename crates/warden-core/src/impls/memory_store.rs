//! InMemoryDocumentStore - 開発用・テスト用のドキュメントストア
//!
//! # 実装詳細
//! - collection ごとに `BTreeMap<_id, Document>` を保持（natural order = `_id` 昇順）
//! - 全操作を 1 つの Mutex の中で完結させるので、1 ドキュメント単位の atomic 性が保証される
//! - ロックを保持したまま await しない

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, WardenError};
use crate::ports::store::{
    Criteria, Cursor, Document, DocumentStore, Filter, ID_FIELD, Update, Upserted, document_id,
};

type Collection = BTreeMap<String, Document>;

#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn require_id(doc: &Document) -> Result<String> {
    document_id(doc)
        .map(str::to_string)
        .ok_or_else(|| WardenError::MissingValue(vec![ID_FIELD.to_string()]))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.values().find(|d| filter.matches(d)))
            .cloned())
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<()> {
        let id = require_id(&doc)?;
        let mut collections = self.collections.lock().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(WardenError::DuplicateResource(id));
        }
        docs.insert(id, doc);
        Ok(())
    }

    async fn insert_if_absent(&self, collection: &str, doc: Document) -> Result<Upserted> {
        let id = require_id(&doc)?;
        let mut collections = self.collections.lock().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(existing) = docs.get(&id) {
            return Ok(Upserted {
                document: existing.clone(),
                inserted: false,
            });
        }
        docs.insert(id, doc.clone());
        Ok(Upserted {
            document: doc,
            inserted: true,
        })
    }

    async fn update(&self, collection: &str, filter: &Filter, update: &Update) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0;
        for doc in docs.values_mut().filter(|d| filter.matches(d)) {
            // 失敗時に中途半端な状態を残さないよう、コピーに適用してから差し替える
            let mut next = doc.clone();
            update.apply(&mut next)?;
            *doc = next;
            modified += 1;
        }
        Ok(modified)
    }

    async fn find_and_modify(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Document>> {
        let mut collections = self.collections.lock().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(None);
        };
        let Some(doc) = docs.values_mut().find(|d| filter.matches(d)) else {
            return Ok(None);
        };
        let mut next = doc.clone();
        update.apply(&mut next)?;
        *doc = next.clone();
        Ok(Some(next))
    }

    async fn remove(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let mut collections = self.collections.lock().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|_, d| !filter.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn query(&self, collection: &str, criteria: &Criteria) -> Result<Cursor> {
        let collections = self.collections.lock().await;
        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|d| criteria.filter.matches(d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        // stable sort: ties keep natural order
        matched.sort_by(|a, b| criteria.compare(a, b));
        let limit = criteria.limit.unwrap_or(usize::MAX);
        let page = matched.into_iter().skip(criteria.skip).take(limit).collect();
        Ok(Cursor::new(page))
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let collections = self.collections.lock().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn save(&self, collection: &str, doc: Document) -> Result<()> {
        let id = require_id(&doc)?;
        let mut collections = self.collections.lock().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, doc);
        Ok(())
    }
}
