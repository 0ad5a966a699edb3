pub mod batch;
pub mod column_map;
pub mod entity;
pub mod error;
pub mod identifier;
pub mod statement;
pub mod value;

pub use batch::Batch;
pub use column_map::{ColumnDescriptor, ColumnMap, Columns, column_map_for};
pub use entity::{Entity, RowValues};
pub use error::ModelError;
pub use identifier::Identifier;
pub use statement::{Rendered, StatementKind, StatementOptions};
pub use value::Value;
