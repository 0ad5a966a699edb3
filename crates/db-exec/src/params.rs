use db_model::Value;
use std::collections::HashMap;

/// Rewrites `:name` tokens in `sql` into `?` placeholders, in order
/// of first occurrence, returning the rewritten text and the ordered
/// parameter names. Shared by both dialects: the query builder always
/// emits named tokens (spec.md §4.6 shows identical `:c…` text for
/// MySQL and PostgreSQL); each executor adapts that text to whatever
/// binding form its driver actually wants.
pub fn positionalize(sql: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut chars = sql.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c == ':' && chars.peek().is_some_and(|(_, n)| n.is_alphabetic() || *n == '_') {
            let mut name = String::new();
            while let Some((_, n)) = chars.peek() {
                if n.is_alphanumeric() || *n == '_' {
                    name.push(*n);
                    chars.next();
                } else {
                    break;
                }
            }
            names.push(name);
            out.push('?');
        } else {
            out.push(c);
        }
    }

    (out, names)
}

/// Orders `values` (a name->value map for one row) according to
/// `names`, the order `positionalize` discovered the tokens in.
/// Panics-class programmer error if a name referenced by the rendered
/// SQL is missing from the row map — this indicates a mismatch
/// between the column map and the row values, not a runtime
/// condition callers should handle.
pub fn order_values(names: &[String], values: &HashMap<String, Value>) -> Vec<Value> {
    names
        .iter()
        .map(|name| {
            values
                .get(name)
                .cloned()
                .unwrap_or_else(|| panic!("missing bound value for named parameter `{name}`"))
        })
        .collect()
}

/// Rewrites `:name` tokens into PostgreSQL's `$1`, `$2`, ... form, in
/// order of first occurrence.
pub fn positionalize_dollar(sql: &str) -> (String, Vec<String>) {
    let mut out = String::with_capacity(sql.len());
    let mut names = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let mut next_index = 1usize;

    while let Some((_, c)) = chars.next() {
        if c == ':' && chars.peek().is_some_and(|(_, n)| n.is_alphabetic() || *n == '_') {
            let mut name = String::new();
            while let Some((_, n)) = chars.peek() {
                if n.is_alphanumeric() || *n == '_' {
                    name.push(*n);
                    chars.next();
                } else {
                    break;
                }
            }
            names.push(name);
            out.push('$');
            out.push_str(&next_index.to_string());
            next_index += 1;
        } else {
            out.push(c);
        }
    }

    (out, names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positionalize_replaces_named_tokens_in_order() {
        let (sql, names) = positionalize("INSERT INTO t (a,b) VALUES (:a, :b)");
        assert_eq!(sql, "INSERT INTO t (a,b) VALUES (?, ?)");
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn positionalize_dollar_numbers_sequentially() {
        let (sql, names) = positionalize_dollar("UPDATE t SET x=:x WHERE id=:id");
        assert_eq!(sql, "UPDATE t SET x=$1 WHERE id=$2");
        assert_eq!(names, vec!["x", "id"]);
    }

    #[test]
    fn order_values_follows_token_order() {
        let mut row = HashMap::new();
        row.insert("a".to_string(), Value::Int(1));
        row.insert("b".to_string(), Value::Int(2));
        let ordered = order_values(&["b".to_string(), "a".to_string()], &row);
        assert_eq!(ordered, vec![Value::Int(2), Value::Int(1)]);
    }
}
