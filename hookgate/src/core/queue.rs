//! Queue records and their session-end folding.
//!
//! Queues are line-delimited JSON written by producers elsewhere in the
//! agent. Reading them lives in [`crate::io::queue_store`]; this module only
//! aggregates and deduplicates what was read.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub relation_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// One line of the graph-memory queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum GraphOperation {
    CreateEntities {
        #[serde(default)]
        entities: Vec<Entity>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    CreateRelations {
        #[serde(default)]
        relations: Vec<Relation>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    AddObservations {
        #[serde(default)]
        entity_name: String,
        #[serde(default)]
        contents: Vec<String>,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Operation types this gate does not sync.
    #[serde(other)]
    Unknown,
}

/// Graph operations folded into one sync payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphBatch {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
    pub observations: Vec<Observation>,
}

impl GraphBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.relations.len() + self.observations.len()
    }
}

pub fn aggregate(operations: impl IntoIterator<Item = GraphOperation>) -> GraphBatch {
    let mut batch = GraphBatch::default();
    for operation in operations {
        match operation {
            GraphOperation::CreateEntities { entities, .. } => batch.entities.extend(entities),
            GraphOperation::CreateRelations { relations, .. } => batch.relations.extend(relations),
            GraphOperation::AddObservations {
                entity_name,
                contents,
                ..
            } => batch.observations.push(Observation {
                entity_name,
                contents,
            }),
            GraphOperation::Unknown => {}
        }
    }
    batch
}

/// One line of the long-term-memory queue.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMemory {
    pub text: String,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, alias = "queued_at")]
    pub queued_at: Option<DateTime<Utc>>,
}

impl QueueMemory {
    fn dedup_key(&self) -> String {
        self.text.trim().to_lowercase()
    }
}

/// Collapse memories whose text differs only by case or surrounding whitespace.
///
/// The entry with the later `queued_at` survives; entries without a
/// timestamp lose to any timestamped one. Output keeps first-seen order.
pub fn deduplicate_memories(memories: Vec<QueueMemory>) -> Vec<QueueMemory> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<QueueMemory> = Vec::new();
    for memory in memories {
        let key = memory.dedup_key();
        match index.get(&key) {
            Some(&slot) => {
                if memory.queued_at >= unique[slot].queued_at {
                    unique[slot] = memory;
                }
            }
            None => {
                index.insert(key, unique.len());
                unique.push(memory);
            }
        }
    }
    unique
}
