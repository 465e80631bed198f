mod versioned_schema;

pub use versioned_schema::{Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema};
