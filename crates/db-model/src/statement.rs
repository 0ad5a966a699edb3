/// One of the statement shapes the query builder (`db-query`) can
/// render. Carried alongside a subject type's column map and an
/// optional table/column override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    InsertIgnore,
    Upsert,
    Update,
    Delete,
    Select,
}

/// Describes one statement to render: subject column set plus the
/// optional overrides spec.md §3 names (explicit table, column
/// allow-list, column exclude-list, WHERE/SET fragment).
#[derive(Debug, Clone, Default)]
pub struct StatementOptions<'a> {
    pub table_override: Option<&'a str>,
    pub columns: Option<&'a [&'a str]>,
    pub exclude_columns: &'a [&'a str],
    /// Raw WHERE fragment (update/delete) or SET fragment (update),
    /// without the leading `WHERE`/`SET` keyword.
    pub where_fragment: Option<&'a str>,
}

impl<'a> StatementOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &'a str) -> Self {
        self.table_override = Some(table);
        self
    }

    pub fn with_columns(mut self, columns: &'a [&'a str]) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_excluded(mut self, excluded: &'a [&'a str]) -> Self {
        self.exclude_columns = excluded;
        self
    }

    pub fn with_where(mut self, fragment: &'a str) -> Self {
        self.where_fragment = Some(fragment);
        self
    }
}

/// Render output: SQL text and the placeholder count the text expects
/// (used to size batches against `MaxPlaceholdersPerStatement`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub sql: String,
    pub placeholders: usize,
}
