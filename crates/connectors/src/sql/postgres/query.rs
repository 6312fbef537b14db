use crate::sql::base::metadata::column::ColumnDef;
use model::{
    core::identifiers::{TableRef, quote_ident},
    execution::job::MergeMode,
};

/// Renders every statement the transfer engine sends to PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryGenerator;

impl QueryGenerator {
    pub fn new() -> Self {
        QueryGenerator
    }

    pub fn count(&self, table: &TableRef, filter: Option<&str>) -> String {
        let mut sql = format!("SELECT COUNT(*) FROM {}", table.qualified());
        push_filter(&mut sql, filter);
        sql
    }

    /// One extraction window. Without `order_by` the row order is whatever
    /// the server returns.
    pub fn select_window(
        &self,
        table: &TableRef,
        filter: Option<&str>,
        order_by: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> String {
        let mut sql = format!("SELECT * FROM {}", table.qualified());
        push_filter(&mut sql, filter);
        if let Some(key) = order_by {
            sql.push_str(&format!(" ORDER BY {}", quote_ident(key)));
        }
        sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
        sql
    }

    pub fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
    }

    pub fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> String {
        let defs = columns
            .iter()
            .map(ColumnDef::to_sql)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({defs})", table.qualified())
    }

    pub fn truncate(&self, table: &TableRef) -> String {
        format!("TRUNCATE TABLE {}", table.qualified())
    }

    /// Transaction-scoped staging relation shaped like `like`.
    pub fn create_staging(&self, staging: &str, like: &TableRef) -> String {
        format!(
            "CREATE TEMP TABLE {} (LIKE {}) ON COMMIT DROP",
            quote_ident(staging),
            like.qualified()
        )
    }

    pub fn copy_from_stdin(&self, staging: &str, columns: &[String]) -> String {
        format!(
            "COPY {} ({}) FROM STDIN",
            quote_ident(staging),
            column_list(columns)
        )
    }

    pub fn merge(
        &self,
        staging: &str,
        dest: &TableRef,
        columns: &[String],
        mode: &MergeMode,
    ) -> String {
        let cols = column_list(columns);
        let mut sql = format!(
            "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
            dest.qualified(),
            quote_ident(staging)
        );
        if let MergeMode::Upsert { key, update_column } = mode {
            let update = quote_ident(update_column);
            sql.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {update} = EXCLUDED.{update}",
                quote_ident(key)
            ));
        }
        sql
    }
}

fn push_filter(sql: &mut String, filter: Option<&str>) {
    if let Some(filter) = filter {
        sql.push_str(&format!(" WHERE {filter}"));
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn count_applies_filter_verbatim() {
        let generator = QueryGenerator::new();
        let table = TableRef::new("public", "orders");
        assert_eq!(
            generator.count(&table, None),
            r#"SELECT COUNT(*) FROM "public"."orders""#
        );
        assert_eq!(
            generator.count(&table, Some("created_at >= '2024-01-01'")),
            r#"SELECT COUNT(*) FROM "public"."orders" WHERE created_at >= '2024-01-01'"#
        );
    }

    #[test]
    fn window_query_orders_only_when_asked() {
        let generator = QueryGenerator::new();
        let table = TableRef::new("public", "orders");
        assert_eq!(
            generator.select_window(&table, None, None, 100, 200),
            r#"SELECT * FROM "public"."orders" LIMIT 100 OFFSET 200"#
        );
        assert_eq!(
            generator.select_window(&table, Some("id > 5"), Some("id"), 10, 0),
            r#"SELECT * FROM "public"."orders" WHERE id > 5 ORDER BY "id" LIMIT 10 OFFSET 0"#
        );
    }

    #[test]
    fn provisioning_statements() {
        let generator = QueryGenerator::new();
        let table = TableRef::new("my", "orders");
        assert_eq!(
            generator.create_schema("my"),
            r#"CREATE SCHEMA IF NOT EXISTS "my""#
        );
        assert_eq!(
            generator.create_table(
                &table,
                &[
                    ColumnDef::new("id", "bigint"),
                    ColumnDef::new("note", "character varying(45)"),
                ]
            ),
            r#"CREATE TABLE IF NOT EXISTS "my"."orders" ("id" bigint, "note" character varying(45))"#
        );
    }

    #[test]
    fn staging_is_dropped_on_commit() {
        let generator = QueryGenerator::new();
        let sql = generator.create_staging("__stage", &TableRef::new("my", "orders"));
        assert_eq!(
            sql,
            r#"CREATE TEMP TABLE "__stage" (LIKE "my"."orders") ON COMMIT DROP"#
        );
        assert_eq!(
            generator.copy_from_stdin("__stage", &cols(&["id", "name"])),
            r#"COPY "__stage" ("id", "name") FROM STDIN"#
        );
    }

    #[test]
    fn append_merge_is_a_plain_insert() {
        let generator = QueryGenerator::new();
        let sql = generator.merge(
            "__stage",
            &TableRef::new("my", "orders"),
            &cols(&["id", "updated_at"]),
            &MergeMode::Append,
        );
        assert_eq!(
            sql,
            r#"INSERT INTO "my"."orders" ("id", "updated_at") SELECT "id", "updated_at" FROM "__stage""#
        );
    }

    #[test]
    fn upsert_only_touches_update_column() {
        let generator = QueryGenerator::new();
        let sql = generator.merge(
            "__stage",
            &TableRef::new("my", "orders"),
            &cols(&["id", "total", "updated_at"]),
            &MergeMode::Upsert {
                key: "id".into(),
                update_column: "updated_at".into(),
            },
        );
        assert!(sql.ends_with(
            r#"ON CONFLICT ("id") DO UPDATE SET "updated_at" = EXCLUDED."updated_at""#
        ));
        assert!(!sql.contains(r#""total" = EXCLUDED"#));
    }
}
