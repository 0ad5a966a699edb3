use once_cell::sync::Lazy;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A single field-path -> column-name mapping, supplied by the entity
/// implementer at compile time (see [`Columns`]). Reflection happens
/// once, at registration, never per row (Design Notes: "Dynamic
/// dispatch over entity types").
#[derive(Debug, Clone, Copy)]
pub struct ColumnDescriptor {
    pub path: &'static str,
    pub column: &'static str,
    pub nullable: bool,
}

/// Implemented by entity types that expose a compile-time column
/// descriptor list, standing in for the source library's per-row
/// struct reflection.
pub trait Columns {
    fn columns() -> &'static [ColumnDescriptor];
}

/// The resolved, owned column set for a single entity type. Built
/// once per type and cached in [`column_map_for`]'s process-lifetime
/// registry.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    entries: Vec<ColumnDescriptor>,
}

impl ColumnMap {
    fn from_descriptors(descs: &[ColumnDescriptor]) -> Self {
        Self {
            entries: descs.to_vec(),
        }
    }

    pub fn entries(&self) -> &[ColumnDescriptor] {
        &self.entries
    }

    /// Column names, sorted for deterministic SQL text (spec.md §8
    /// treats ordering as unspecified for correctness but recommends
    /// sorting for test determinism).
    pub fn sorted_column_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.iter().map(|e| e.column).collect();
        names.sort_unstable();
        names
    }

    /// The rendered column set: explicit allow-list (if given) or all
    /// mapped columns, minus any excluded columns. Mirrors
    /// StatementDescriptor's `columns ∪ reflected − excluded` rule.
    pub fn rendered_columns(
        &self,
        explicit: Option<&[&str]>,
        excluded: &[&str],
    ) -> Vec<&'static str> {
        let base: Vec<&'static str> = match explicit {
            Some(cols) => self
                .entries
                .iter()
                .map(|e| e.column)
                .filter(|c| cols.contains(c))
                .collect(),
            None => self.entries.iter().map(|e| e.column).collect(),
        };
        let mut rendered: Vec<&'static str> = base
            .into_iter()
            .filter(|c| !excluded.contains(c))
            .collect();
        rendered.sort_unstable();
        rendered
    }
}

static REGISTRY: Lazy<Mutex<HashMap<TypeId, Arc<ColumnMap>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the process-lifetime-cached column map for `E`, building it
/// on first use.
pub fn column_map_for<E: Columns + 'static>() -> Arc<ColumnMap> {
    let mut registry = REGISTRY.lock().expect("column map registry poisoned");
    registry
        .entry(TypeId::of::<E>())
        .or_insert_with(|| Arc::new(ColumnMap::from_descriptors(E::columns())))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    impl Columns for Widget {
        fn columns() -> &'static [ColumnDescriptor] {
            &[
                ColumnDescriptor {
                    path: "name",
                    column: "name",
                    nullable: false,
                },
                ColumnDescriptor {
                    path: "created_at",
                    column: "created_at",
                    nullable: true,
                },
            ]
        }
    }

    #[test]
    fn caches_by_type() {
        let a = column_map_for::<Widget>();
        let b = column_map_for::<Widget>();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn rendered_columns_excludes_and_sorts() {
        let map = column_map_for::<Widget>();
        let rendered = map.rendered_columns(None, &["created_at"]);
        assert_eq!(rendered, vec!["name"]);
    }

    #[test]
    fn explicit_allow_list_narrows_columns() {
        let map = column_map_for::<Widget>();
        let rendered = map.rendered_columns(Some(&["name"]), &[]);
        assert_eq!(rendered, vec!["name"]);
    }

    #[test]
    fn rebuild_with_noop_exclusion_is_byte_identical() {
        let map = column_map_for::<Widget>();
        let a = map.rendered_columns(None, &[]);
        let b = map.rendered_columns(None, &["not_a_real_column"]);
        assert_eq!(a, b);
    }
}
