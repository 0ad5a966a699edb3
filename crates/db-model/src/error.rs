use thiserror::Error;

/// Programmer-class errors: assertion failures that should fail
/// construction rather than be retried (spec.md §7 "Programmer").
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("column reflection failed for `{type_name}`: {reason}")]
    ColumnReflection {
        type_name: &'static str,
        reason: String,
    },

    #[error("statement is missing a required WHERE clause for table `{table}`")]
    MissingStatementPart { table: String },
}
