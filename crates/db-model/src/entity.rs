use crate::identifier::Identifier;
use crate::value::Value;
use std::collections::HashMap;

/// Any value with a stable identifier and a table mapping.
///
/// `table_name()` defaults to the snake-cased type name; implementors
/// that need an explicit override just override that method directly.
/// `constraint_name()`/`upsert_columns()` are the other two duck-typed
/// capabilities spec.md §4.6 calls for ("the builder checks whether an
/// entity implements a custom table name / constraint namer / upsert
/// column set") — each defaults to `None`, meaning "no opinion", and
/// the bulk executor (C7) consults them as a fallback only when the
/// caller's [`StreamOptions`](crate) field for the same knob wasn't
/// set explicitly. Modeled as default methods rather than separate
/// marker traits: generic pipeline code already only has an `E: Entity`
/// bound in scope, and Rust has no specialization to conditionally
/// call a trait an unconstrained `E` might not implement.
pub trait Entity {
    fn id(&self) -> Identifier;

    /// A value that changes whenever any observable field of the
    /// entity changes; used by upsert paths to short-circuit a
    /// no-op update. Two entities with the same `id()` and the same
    /// `fingerprint()` are considered unchanged.
    fn fingerprint(&self) -> Vec<u8>;

    fn table_name(&self) -> String {
        snake_case(std::any::type_name::<Self>().rsplit("::").next().unwrap())
    }

    /// Capability: names the UNIQUE/PRIMARY KEY constraint the query
    /// builder should target in an `ON CONFLICT ON CONSTRAINT` clause,
    /// overriding the `pk_<table>` default. `None` means no opinion.
    fn constraint_name(&self) -> Option<&str> {
        None
    }

    /// Capability: narrows an upsert's `SET` clause to a specific
    /// column subset instead of every non-key column. `None` means no
    /// opinion.
    fn upsert_columns(&self) -> Option<&[&str]> {
        None
    }
}

/// The compile-time stand-in for the source library's per-row struct
/// reflection (Design Notes: "Dynamic dispatch over entity types"):
/// one column-name -> bound-value map per entity, built from whatever
/// fields the implementor's [`Columns`](crate::column_map::Columns)
/// descriptor names. `db-exec`'s bulk executor calls this once per
/// row at bind time, never per-column.
pub trait RowValues {
    fn row_values(&self) -> HashMap<String, Value>;
}

fn snake_case(type_name: &str) -> String {
    let mut out = String::with_capacity(type_name.len() + 4);
    for (i, ch) in type_name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_cases_camel_type_names() {
        assert_eq!(snake_case("HostState"), "host_state");
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("IcingaDbInstance"), "icinga_db_instance");
    }
}
