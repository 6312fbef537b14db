use model::core::identifiers::quote_ident;

pub const COL_COLUMN_NAME: &str = "column_name";
pub const COL_DATA_TYPE: &str = "data_type";

/// Name and SQL type of one table column, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Fully formatted type, e.g. `character varying(45)` or `numeric(10,2)`.
    pub data_type: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        ColumnDef {
            name: name.into(),
            data_type: data_type.into(),
        }
    }

    /// Column definition as used inside `CREATE TABLE`.
    pub fn to_sql(&self) -> String {
        format!("{} {}", quote_ident(&self.name), self.data_type)
    }
}
