//! Splits a MySQL/MariaDB SQL script into individual statements.
//!
//! Line-oriented: the active delimiter (`;` by default) only ends a
//! statement when it terminates a line, and a `DELIMITER <x>` directive
//! at the start of a line changes the active delimiter for what
//! follows (mirrors the `mysql` CLI client's own splitting rules).
//! Quoted strings and comments are not understood — the caller must
//! not place the active delimiter at the end of a line inside one.

/// Splits `script` into trimmed, non-empty statements using the
/// default `;` delimiter, honouring `DELIMITER <x>` directives.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut delimiter = ";".to_string();

    for line in script.lines() {
        let trimmed = line.trim();

        if let Some(rest) = trimmed.strip_prefix("DELIMITER ") {
            flush(&mut current, &mut statements);
            delimiter = rest.trim().to_string();
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if let Some(body) = trimmed.strip_suffix(delimiter.as_str()) {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(body.trim_end());
            flush(&mut current, &mut statements);
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    flush(&mut current, &mut statements);
    statements
}

fn flush(current: &mut String, statements: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_script_returns_no_statements() {
        assert!(split_statements("").is_empty());
    }

    #[test]
    fn splits_on_newline_terminated_semicolon() {
        let script = "SELECT 1;\nSELECT 2;\n";
        assert_eq!(split_statements(script), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn trailing_delimiter_is_optional() {
        let script = "SELECT 1;\nSELECT 2";
        assert_eq!(split_statements(script), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn delimiter_directive_changes_active_delimiter() {
        let script = "DELIMITER $$\nCREATE PROCEDURE p()\nBEGIN\n  SELECT 1;\nEND$$\nDELIMITER ;\nSELECT 2;\n";
        let statements = split_statements(script);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE PROCEDURE"));
        assert!(statements[0].contains("SELECT 1;"));
        assert_eq!(statements[1], "SELECT 2");
    }

    #[test]
    fn delimiter_directive_with_no_following_statements_is_a_no_op() {
        let script = "DELIMITER $$\nDELIMITER ;\n";
        assert!(split_statements(script).is_empty());
    }

    #[test]
    fn multiline_statement_is_joined_with_newlines() {
        let script = "SELECT\n  1,\n  2;\n";
        assert_eq!(split_statements(script), vec!["SELECT\n  1,\n  2"]);
    }
}
