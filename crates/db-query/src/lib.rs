pub mod builder;
pub mod dialect;
pub mod splitter;

pub use builder::{
    render_delete, render_delete_all, render_insert, render_insert_ignore, render_select,
    render_update, render_update_all, render_upsert,
};
pub use dialect::{SqlDialect, default_constraint_name};
pub use splitter::split_statements;
