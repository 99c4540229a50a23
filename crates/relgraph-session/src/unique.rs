//! Reusable compiled lookups by a single column value.
//!
//! One slot per `(entity, column)`, each behind its own mutex so lookups on
//! different columns never wait on each other. A slot keeps the options it
//! was compiled with and is rebuilt when a caller passes different ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use relgraph_core::{EntityId, ModelRegistry, Result};
use relgraph_query::{CompileOptions, CompiledQuery, Filter, Query};

type Slot = Arc<Mutex<Option<(CompileOptions, Arc<CompiledQuery>)>>>;

#[derive(Debug, Default)]
pub struct UniqueLookups {
    slots: Mutex<HashMap<(EntityId, String), Slot>>,
}

impl UniqueLookups {
    /// The compiled `column = ?` lookup for `entity`, with the value in slot 0.
    pub fn compiled(
        &self,
        registry: &ModelRegistry,
        entity: EntityId,
        column: &str,
        options: &CompileOptions,
    ) -> Result<Arc<CompiledQuery>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry((entity, column.to_string())).or_default())
        };

        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_options, compiled)) = guard.as_ref() {
            if cached_options == options {
                return Ok(Arc::clone(compiled));
            }
        }

        tracing::debug!(entity = %entity, column = column, "compiling unique lookup");
        let compiled = Query::new(entity)
            .filter(Filter::new().is_slot(column, 0))
            .compile(registry, options)?;
        *guard = Some((options.clone(), Arc::clone(&compiled)));
        Ok(compiled)
    }

    /// Number of `(entity, column)` slots created so far.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relgraph_core::{BuildErrorKind, Column, ColumnType, EntityDescriptor, Error, Value};
    use relgraph_query::Dialect;

    fn registry() -> ModelRegistry {
        ModelRegistry::builder()
            .entity(
                EntityDescriptor::new("Team", "team")
                    .column(Column::primary("id"))
                    .column(Column::new("name", ColumnType::Text).unique()),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_is_reused_for_matching_options() {
        let registry = registry();
        let team = registry.entity_id("Team").unwrap();
        let lookups = UniqueLookups::default();
        let options = CompileOptions::default();

        let first = lookups.compiled(&registry, team, "name", &options).unwrap();
        let second = lookups.compiled(&registry, team, "name", &options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.bind(&["Red".into()]).unwrap(), vec![Value::from("Red")]);

        let numbered = CompileOptions::default().dialect(Dialect::Numbered);
        let third = lookups.compiled(&registry, team, "name", &numbered).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.sql().contains("t0.name = $1"));
        assert_eq!(lookups.len(), 1);
    }

    #[test]
    fn test_unknown_column_is_a_build_error() {
        let registry = registry();
        let team = registry.entity_id("Team").unwrap();
        let err = UniqueLookups::default()
            .compiled(&registry, team, "motto", &CompileOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Build(e) if e.kind == BuildErrorKind::UnknownColumn));
    }
}
