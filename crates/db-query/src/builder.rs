use crate::dialect::{SqlDialect, default_constraint_name};
use db_model::{ModelError, Rendered};

/// `INSERT INTO "table" (cols...) VALUES (:cols...)`. Placeholder
/// count equals `columns.len()`, used by the executor to size batches
/// against `MaxPlaceholdersPerStatement`.
pub fn render_insert(dialect: SqlDialect, table: &str, columns: &[&str]) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    Ok(base_insert(dialect, table, columns))
}

/// Insert with a no-op conflict handler: MySQL self-assigns the first
/// column (`ON DUPLICATE KEY UPDATE "c0"="c0"`), PostgreSQL no-ops on
/// the named constraint (`ON CONFLICT ON CONSTRAINT <k> DO NOTHING`).
pub fn render_insert_ignore(
    dialect: SqlDialect,
    table: &str,
    columns: &[&str],
    constraint_name: Option<&str>,
) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    let base = base_insert(dialect, table, columns);
    let tail = match dialect {
        SqlDialect::MySql => {
            let c0 = dialect.quote_identifier(columns[0]);
            format!(" ON DUPLICATE KEY UPDATE {c0}={c0}")
        }
        SqlDialect::Postgres => {
            let k = constraint_name
                .map(str::to_string)
                .unwrap_or_else(|| default_constraint_name(table));
            format!(" ON CONFLICT ON CONSTRAINT {k} DO NOTHING")
        }
    };
    Ok(Rendered {
        sql: base.sql + &tail,
        placeholders: base.placeholders,
    })
}

/// Insert with conflict resolution that updates non-key columns:
/// MySQL `ON DUPLICATE KEY UPDATE "ci"=VALUES("ci")`, PostgreSQL
/// `ON CONFLICT ON CONSTRAINT <k> DO UPDATE SET "ci"=EXCLUDED."ci"`.
///
/// The `SET`/`UPDATE` clause targets `upsert_columns` when the subject
/// supplied one (spec.md §4.6 "narrows the update clause to those
/// columns"), otherwise every rendered column not present in
/// `key_columns`.
pub fn render_upsert(
    dialect: SqlDialect,
    table: &str,
    columns: &[&str],
    key_columns: &[&str],
    upsert_columns: Option<&[&str]>,
    constraint_name: Option<&str>,
) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    let base = base_insert(dialect, table, columns);

    let update_cols: Vec<&str> = match upsert_columns {
        Some(cols) => cols.to_vec(),
        None => columns
            .iter()
            .copied()
            .filter(|c| !key_columns.contains(c))
            .collect(),
    };

    let tail = match dialect {
        SqlDialect::MySql => {
            if update_cols.is_empty() {
                let c0 = dialect.quote_identifier(columns[0]);
                format!(" ON DUPLICATE KEY UPDATE {c0}={c0}")
            } else {
                let assignments = update_cols
                    .iter()
                    .map(|c| {
                        let q = dialect.quote_identifier(c);
                        format!("{q}=VALUES({q})")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON DUPLICATE KEY UPDATE {assignments}")
            }
        }
        SqlDialect::Postgres => {
            let k = constraint_name
                .map(str::to_string)
                .unwrap_or_else(|| default_constraint_name(table));
            if update_cols.is_empty() {
                format!(" ON CONFLICT ON CONSTRAINT {k} DO NOTHING")
            } else {
                let assignments = update_cols
                    .iter()
                    .map(|c| {
                        let q = dialect.quote_identifier(c);
                        format!("{q}=EXCLUDED.{q}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" ON CONFLICT ON CONSTRAINT {k} DO UPDATE SET {assignments}")
            }
        }
    };

    Ok(Rendered {
        sql: base.sql + &tail,
        placeholders: base.placeholders,
    })
}

/// `UPDATE "table" SET "ci"=:ci WHERE <fragment>`. Fails with
/// [`ModelError::MissingStatementPart`] when no WHERE fragment is
/// given — use [`render_update_all`] for the distinct all-rows
/// variant.
pub fn render_update(
    dialect: SqlDialect,
    table: &str,
    columns: &[&str],
    where_fragment: Option<&str>,
) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    let where_fragment = where_fragment.ok_or_else(|| ModelError::MissingStatementPart {
        table: table.to_string(),
    })?;
    Ok(render_update_unchecked(dialect, table, columns, where_fragment))
}

/// The explicit, distinct all-rows update (spec.md §4.6: "a matching
/// all-rows variant is a distinct operation").
pub fn render_update_all(dialect: SqlDialect, table: &str, columns: &[&str]) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    let sql = format!(
        "UPDATE {} SET {}",
        dialect.quote_identifier(table),
        set_clause(dialect, columns)
    );
    Ok(Rendered {
        sql,
        placeholders: columns.len(),
    })
}

fn render_update_unchecked(dialect: SqlDialect, table: &str, columns: &[&str], where_fragment: &str) -> Rendered {
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.quote_identifier(table),
        set_clause(dialect, columns),
        where_fragment
    );
    Rendered {
        sql,
        placeholders: columns.len(),
    }
}

fn set_clause(dialect: SqlDialect, columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| {
            let q = dialect.quote_identifier(c);
            format!("{q}=:{c}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `DELETE FROM "table" WHERE "col" IN (?, ?, ...)` with `count`
/// positional placeholders, sized by the executor against
/// `MaxPlaceholdersPerStatement`. Fails when `count == 0` — an empty
/// `IN ()` is a programmer error, not a zero-row no-op.
pub fn render_delete(
    dialect: SqlDialect,
    table: &str,
    column: &str,
    count: usize,
) -> Result<Rendered, ModelError> {
    if count == 0 {
        return Err(ModelError::MissingStatementPart {
            table: table.to_string(),
        });
    }
    let placeholders = vec!["?"; count].join(", ");
    let sql = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        dialect.quote_identifier(table),
        dialect.quote_identifier(column),
        placeholders
    );
    Ok(Rendered { sql, placeholders: count })
}

/// The distinct all-rows delete.
pub fn render_delete_all(dialect: SqlDialect, table: &str) -> Rendered {
    Rendered {
        sql: format!("DELETE FROM {}", dialect.quote_identifier(table)),
        placeholders: 0,
    }
}

/// `SELECT "ci" FROM "table" [WHERE <fragment>]`.
pub fn render_select(
    dialect: SqlDialect,
    table: &str,
    columns: &[&str],
    where_fragment: Option<&str>,
) -> Result<Rendered, ModelError> {
    require_columns(table, columns)?;
    let cols_sql = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let mut sql = format!("SELECT {cols_sql} FROM {}", dialect.quote_identifier(table));
    if let Some(fragment) = where_fragment {
        sql.push_str(" WHERE ");
        sql.push_str(fragment);
    }
    Ok(Rendered { sql, placeholders: 0 })
}

fn base_insert(dialect: SqlDialect, table: &str, columns: &[&str]) -> Rendered {
    let cols_sql = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders_sql = columns.iter().map(|c| format!(":{c}")).collect::<Vec<_>>().join(", ");
    let sql = format!(
        "INSERT INTO {} ({cols_sql}) VALUES ({placeholders_sql})",
        dialect.quote_identifier(table)
    );
    Rendered {
        sql,
        placeholders: columns.len(),
    }
}

fn require_columns(table: &str, columns: &[&str]) -> Result<(), ModelError> {
    if columns.is_empty() {
        return Err(ModelError::MissingStatementPart {
            table: table.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_insert_uses_named_placeholders() {
        let r = render_insert(SqlDialect::MySql, "host", &["name", "state"]).unwrap();
        assert_eq!(
            r.sql,
            "INSERT INTO \"host\" (\"name\", \"state\") VALUES (:name, :state)"
        );
        assert_eq!(r.placeholders, 2);
    }

    #[test]
    fn mysql_insert_ignore_self_assigns_first_column() {
        let r = render_insert_ignore(SqlDialect::MySql, "host", &["name", "state"], None).unwrap();
        assert!(r.sql.ends_with("ON DUPLICATE KEY UPDATE \"name\"=\"name\""));
    }

    #[test]
    fn postgres_insert_ignore_uses_named_constraint() {
        let r = render_insert_ignore(SqlDialect::Postgres, "host", &["name"], None).unwrap();
        assert!(r.sql.ends_with("ON CONFLICT ON CONSTRAINT pk_host DO NOTHING"));
    }

    #[test]
    fn postgres_insert_ignore_honors_explicit_constraint() {
        let r = render_insert_ignore(SqlDialect::Postgres, "host", &["name"], Some("uq_host_name")).unwrap();
        assert!(r.sql.ends_with("ON CONFLICT ON CONSTRAINT uq_host_name DO NOTHING"));
    }

    #[test]
    fn mysql_upsert_excludes_key_columns_by_default() {
        let r = render_upsert(SqlDialect::MySql, "host", &["id", "name", "state"], &["id"], None, None).unwrap();
        assert!(r.sql.contains("ON DUPLICATE KEY UPDATE \"name\"=VALUES(\"name\"), \"state\"=VALUES(\"state\")"));
    }

    #[test]
    fn postgres_upsert_narrows_to_explicit_upsert_columns() {
        let upsert_cols = ["state"];
        let r = render_upsert(
            SqlDialect::Postgres,
            "host",
            &["id", "name", "state"],
            &["id"],
            Some(&upsert_cols),
            None,
        )
        .unwrap();
        assert!(r.sql.ends_with("ON CONFLICT ON CONSTRAINT pk_host DO UPDATE SET \"state\"=EXCLUDED.\"state\""));
    }

    #[test]
    fn update_requires_where_fragment() {
        let err = render_update(SqlDialect::MySql, "host", &["state"], None).unwrap_err();
        assert!(matches!(err, ModelError::MissingStatementPart { .. }));
    }

    #[test]
    fn update_with_where_renders_set_and_where() {
        let r = render_update(SqlDialect::MySql, "host", &["state"], Some("\"id\"=:id")).unwrap();
        assert_eq!(r.sql, "UPDATE \"host\" SET \"state\"=:state WHERE \"id\"=:id");
    }

    #[test]
    fn update_all_has_no_where_and_is_a_distinct_call() {
        let r = render_update_all(SqlDialect::MySql, "host", &["state"]).unwrap();
        assert_eq!(r.sql, "UPDATE \"host\" SET \"state\"=:state");
    }

    #[test]
    fn delete_expands_in_clause_by_count() {
        let r = render_delete(SqlDialect::MySql, "host", "id", 3).unwrap();
        assert_eq!(r.sql, "DELETE FROM \"host\" WHERE \"id\" IN (?, ?, ?)");
        assert_eq!(r.placeholders, 3);
    }

    #[test]
    fn delete_rejects_zero_count() {
        let err = render_delete(SqlDialect::MySql, "host", "id", 0).unwrap_err();
        assert!(matches!(err, ModelError::MissingStatementPart { .. }));
    }

    #[test]
    fn select_without_where_omits_clause() {
        let r = render_select(SqlDialect::MySql, "host", &["id", "name"], None).unwrap();
        assert_eq!(r.sql, "SELECT \"id\", \"name\" FROM \"host\"");
    }

    #[test]
    fn select_with_where_appends_clause() {
        let r = render_select(SqlDialect::MySql, "host", &["id"], Some("\"state\"='up'")).unwrap();
        assert_eq!(r.sql, "SELECT \"id\" FROM \"host\" WHERE \"state\"='up'");
    }

    #[test]
    fn rebuilding_with_noop_excluded_column_is_byte_identical() {
        let a = render_insert(SqlDialect::MySql, "host", &["name"]).unwrap();
        let b = render_insert(SqlDialect::MySql, "host", &["name"]).unwrap();
        assert_eq!(a.sql, b.sql);
    }
}
