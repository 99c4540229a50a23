//! Tree-shaped view of an instance graph for presentation layers.

use std::collections::BTreeMap;

use relgraph_core::ModelRegistry;
use serde::Serialize;

use crate::instance::{Arena, InstanceId, RelationalData};

/// One instance with its flat column values and whatever relations are
/// already materialized. Relations are never loaded to build a tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceTree {
    #[serde(rename = "type")]
    pub entity: String,
    pub id: Option<i64>,
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Option<InstanceTree>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub collections: BTreeMap<String, Vec<InstanceTree>>,
    /// Relations were cut off at the depth limit.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl InstanceTree {
    /// Build the tree rooted at `root`, following relations at most
    /// `max_depth` levels deep. Cycles end at the depth limit.
    pub fn build(
        registry: &ModelRegistry,
        arena: &Arena,
        root: InstanceId,
        max_depth: usize,
    ) -> Option<Self> {
        Self::node(registry, arena, root, 0, max_depth)
    }

    fn node(
        registry: &ModelRegistry,
        arena: &Arena,
        handle: InstanceId,
        depth: usize,
        max_depth: usize,
    ) -> Option<Self> {
        let instance = arena.get(handle)?;

        // Own level first so its primary key wins over same-named columns.
        let mut order: Vec<usize> = vec![instance.leaf_slot()];
        order.extend((0..instance.layout.len()).filter(|&s| s != instance.leaf_slot()));

        let mut fields = serde_json::Map::new();
        for slot in order {
            if instance.row(slot).is_none() {
                continue;
            }
            let structure = registry.structure(instance.layout[slot]);
            for (index, column) in structure.columns().iter().enumerate() {
                if !fields.contains_key(&column.name) {
                    fields.insert(column.name.clone(), instance.value(slot, index).to_json());
                }
            }
        }

        let mut tree = InstanceTree {
            entity: registry.structure(instance.entity).name().to_string(),
            id: instance.id(),
            fields,
            references: BTreeMap::new(),
            collections: BTreeMap::new(),
            truncated: false,
        };

        if instance.relations.is_empty() {
            return Some(tree);
        }
        if depth >= max_depth {
            tree.truncated = true;
            return Some(tree);
        }

        for (name, data) in &instance.relations {
            match data {
                RelationalData::Reference { target, .. } => {
                    let child = target.and_then(|t| Self::node(registry, arena, t, depth + 1, max_depth));
                    tree.references.insert(name.clone(), child);
                }
                RelationalData::Collection { .. } => {
                    let children = data
                        .members()
                        .into_iter()
                        .filter_map(|m| Self::node(registry, arena, m, depth + 1, max_depth))
                        .collect();
                    tree.collections.insert(name.clone(), children);
                }
            }
        }
        Some(tree)
    }
}
