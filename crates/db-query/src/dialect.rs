/// The two SQL dialects the builder renders for. Both render
/// double-quoted identifiers (spec.md §4.6); the dialects diverge only
/// in how an insert-shaped statement reacts to a key conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    MySql,
    Postgres,
}

impl SqlDialect {
    pub fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// Default constraint name used by `ON CONFLICT ON CONSTRAINT` / the
/// MySQL upsert path's implicit key, when the subject doesn't name one
/// via `Entity::constraint_name()`.
pub fn default_constraint_name(table: &str) -> String {
    format!("pk_{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_and_escapes_embedded_quotes() {
        let d = SqlDialect::MySql;
        assert_eq!(d.quote_identifier("host"), "\"host\"");
        assert_eq!(d.quote_identifier("weird\"col"), "\"weird\"\"col\"");
    }

    #[test]
    fn default_constraint_name_prefixes_pk() {
        assert_eq!(default_constraint_name("host"), "pk_host");
    }
}
