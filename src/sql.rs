//! Statement text for the loader and the schema inferrer.
//!
//! Identifiers (schema, table and column names) are always sanitized and
//! double-quoted here. Values never appear in statement text; callers bind
//! them as parameters.

use uuid::Uuid;

use crate::table_schema::TableSchema;

pub const PRIMARY_KEY_COLUMN: &str = "_id";

/// Postgres limit on bind parameters per statement.
pub const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;
const MAX_IDENTIFIER_LEN: usize = 63;

pub const TABLE_EXISTS: &str = "SELECT EXISTS (\
     SELECT 1 FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2\
     ) AS present";

pub fn sanitize_identifier(name: &str) -> String {
    name.replace([' ', ':', '-'], "_")
}

/// True for any source column that ends up as the `_id` key once sanitized.
pub fn is_primary_key(name: &str) -> bool {
    sanitize_identifier(name) == PRIMARY_KEY_COLUMN
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!(
        "{}.{}",
        quote_identifier(&sanitize_identifier(schema)),
        quote_identifier(&sanitize_identifier(table))
    )
}

pub fn drop_table(schema: &str, table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified_table(schema, table))
}

pub fn set_search_path(schema: &str) -> String {
    format!(
        "SET search_path TO {}",
        quote_identifier(&sanitize_identifier(schema))
    )
}

/// Staging names carry a per-run suffix so two loads of the same target never
/// share a staging table.
pub fn staging_table_name(table: &str, run_id: &Uuid) -> String {
    let suffix = run_id.simple().to_string();
    let suffix = &suffix[..12];
    let budget = MAX_IDENTIFIER_LEN - "_stg_".len() - suffix.len();

    let mut base = sanitize_identifier(table);
    if base.len() > budget {
        let mut cut = budget;
        while !base.is_char_boundary(cut) {
            cut -= 1;
        }
        base.truncate(cut);
    }
    format!("{}_stg_{}", base, suffix)
}

pub fn create_staging_table(staging: &str, schema: &TableSchema) -> String {
    format!(
        "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS)",
        quote_identifier(staging),
        schema.qualified_name()
    )
}

pub fn drop_staging_table(staging: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(staging))
}

fn column_list(schema: &TableSchema) -> String {
    schema
        .columns
        .iter()
        .map(|c| quote_identifier(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn rows_per_insert(column_count: usize) -> usize {
    (MAX_BIND_PARAMS / column_count.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

pub fn insert_staging_rows(staging: &str, schema: &TableSchema, row_count: usize) -> String {
    let width = schema.columns.len();
    let tuples = (0..row_count)
        .map(|row| {
            let params = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", params)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(staging),
        column_list(schema),
        tuples
    )
}

pub fn upsert_from_staging(staging: &str, schema: &TableSchema) -> String {
    let columns = column_list(schema);
    let mut statement = format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        schema.qualified_name(),
        columns,
        columns,
        quote_identifier(staging)
    );

    if schema.has_primary_key() {
        let updates = schema
            .columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| {
                let ident = quote_identifier(&c.name);
                format!("{} = EXCLUDED.{}", ident, ident)
            })
            .collect::<Vec<_>>();

        let conflict_target = quote_identifier(PRIMARY_KEY_COLUMN);
        if updates.is_empty() {
            statement.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", conflict_target));
        } else {
            statement.push_str(&format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                conflict_target,
                updates.join(", ")
            ));
        }
    }

    statement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Dataset, Value};

    fn schema_for(columns: &[&str]) -> TableSchema {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let row = columns.iter().map(|_| Value::Int(1)).collect();
        let dataset = Dataset::from_rows(columns, vec![row]);
        TableSchema::infer("public", "mot_recalls", &dataset).unwrap()
    }

    #[test]
    fn test_sanitize_and_quote() {
        assert_eq!(sanitize_identifier("sug degem:x-y"), "sug_degem_x_y");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(qualified_table("public", "mot prices"), "\"public\".\"mot_prices\"");
    }

    #[test]
    fn test_upsert_updates_every_non_id_column() {
        let sql = upsert_from_staging("stg", &schema_for(&["_id", "a", "b"]));
        assert_eq!(
            sql,
            "INSERT INTO \"public\".\"mot_recalls\" (\"_id\", \"a\", \"b\") \
             SELECT \"_id\", \"a\", \"b\" FROM \"stg\" \
             ON CONFLICT (\"_id\") DO UPDATE SET \"a\" = EXCLUDED.\"a\", \"b\" = EXCLUDED.\"b\""
        );
    }

    #[test]
    fn test_upsert_with_only_id_does_nothing_on_conflict() {
        let sql = upsert_from_staging("stg", &schema_for(&["_id"]));
        assert!(sql.ends_with("ON CONFLICT (\"_id\") DO NOTHING"));
    }

    #[test]
    fn test_upsert_without_id_is_plain_insert() {
        let sql = upsert_from_staging("stg", &schema_for(&["a"]));
        assert!(!sql.contains("ON CONFLICT"));
    }

    #[test]
    fn test_staging_names_are_unique_and_bounded() {
        let long_table = "t".repeat(80);
        let first = staging_table_name(&long_table, &Uuid::new_v4());
        let second = staging_table_name(&long_table, &Uuid::new_v4());
        assert_ne!(first, second);
        assert!(first.len() <= MAX_IDENTIFIER_LEN);
        assert!(staging_table_name("mot_recalls", &Uuid::new_v4()).starts_with("mot_recalls_stg_"));
    }

    #[test]
    fn test_insert_placeholders_are_numbered_row_major() {
        let sql = insert_staging_rows("stg", &schema_for(&["_id", "a"]), 2);
        assert!(sql.ends_with("VALUES ($1, $2), ($3, $4)"));
    }

    #[test]
    fn test_rows_per_insert_respects_bind_limit() {
        assert_eq!(rows_per_insert(2), MAX_ROWS_PER_INSERT);
        assert_eq!(rows_per_insert(100), 655);
        assert_eq!(rows_per_insert(100_000), 1);
    }
}
