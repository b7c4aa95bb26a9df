//! Relationship resolution
//!
//! Replaces relationship ids with the documents they point at, down to a
//! caller-chosen depth. Reads only.

use futures::future::BoxFuture;
use std::collections::HashMap;

use super::executor::Engine;
use crate::error::Result;
use crate::schema::Cardinality;
use crate::storage::{Conn, Document, DocumentId, Value};

impl Engine<'_> {
    /// Resolve the relationships of `doc`, a document of `collection`.
    ///
    /// At `current >= depth` the document is returned untouched, so at depth
    /// 0 relationship fields always hold raw ids. Single relationships become
    /// the target document or null; many-valued ones become the targets in
    /// stored order, skipping ids whose document no longer exists.
    pub fn resolve<'a>(
        &'a self,
        conn: &'a mut Conn<'_>,
        collection: &'a str,
        mut doc: Document,
        depth: u32,
        current: u32,
    ) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move {
            if current >= depth {
                return Ok(doc);
            }
            let id_type = self.registry.id_type();

            for relation in self.registry.relations().relationships_of(collection) {
                let Some(value) = doc.fields.get(&relation.field) else {
                    continue;
                };
                let resolved = match relation.cardinality {
                    Cardinality::Single => match DocumentId::from_value(value, id_type) {
                        Some(id) => {
                            let target = self.fetch_by_ids(conn, &relation.target, &[id]).await?;
                            match target.into_iter().next() {
                                Some(child) => {
                                    let child = self
                                        .resolve(conn, &relation.target, child, depth, current + 1)
                                        .await?;
                                    Value::from(child)
                                }
                                None => Value::Null,
                            }
                        }
                        None => Value::Null,
                    },
                    Cardinality::Many => {
                        let ids: Vec<DocumentId> = value
                            .as_array()
                            .map(|items| items.iter().filter_map(|v| DocumentId::from_value(v, id_type)).collect())
                            .unwrap_or_default();
                        let by_id: HashMap<DocumentId, Document> = self
                            .fetch_by_ids(conn, &relation.target, &ids)
                            .await?
                            .into_iter()
                            .map(|d| (d.id.clone(), d))
                            .collect();
                        let mut children = Vec::with_capacity(ids.len());
                        for id in &ids {
                            let Some(child) = by_id.get(id).cloned() else {
                                continue;
                            };
                            let child = self
                                .resolve(conn, &relation.target, child, depth, current + 1)
                                .await?;
                            children.push(Value::from(child));
                        }
                        Value::Array(children)
                    }
                };
                doc.fields.insert(relation.field.clone(), resolved);
            }
            Ok(doc)
        })
    }

    pub(crate) async fn resolve_all(
        &self,
        conn: &mut Conn<'_>,
        collection: &str,
        docs: Vec<Document>,
        depth: u32,
    ) -> Result<Vec<Document>> {
        if depth == 0 {
            return Ok(docs);
        }
        let mut resolved = Vec::with_capacity(docs.len());
        for doc in docs {
            resolved.push(self.resolve(conn, collection, doc, depth, 0).await?);
        }
        Ok(resolved)
    }
}
