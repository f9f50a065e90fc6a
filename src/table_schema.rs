use std::collections::HashSet;

use crate::dataset::{ColumnType, Dataset};
use crate::error::EtlError;
use crate::sql::{is_primary_key, qualified_table, quote_identifier, sanitize_identifier};

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Sanitized identifier used in SQL.
    pub name: String,
    /// Position of the column in the dataset rows.
    pub source_index: usize,
    pub column_type: ColumnType,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn definition(&self) -> String {
        if self.primary_key {
            format!("{} INTEGER PRIMARY KEY", quote_identifier(&self.name))
        } else {
            format!(
                "{} {}",
                quote_identifier(&self.name),
                self.column_type.sql_type()
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn infer(schema: &str, table: &str, dataset: &Dataset) -> Result<Self, EtlError> {
        let types = dataset.column_types();
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(types.len());

        for (idx, (source, column_type)) in dataset.columns().iter().zip(types).enumerate() {
            let name = sanitize_identifier(source);
            if !seen.insert(name.clone()) {
                return Err(EtlError::SchemaError {
                    message: format!(
                        "column '{}' collides with another column after sanitizing to '{}'",
                        source, name
                    ),
                });
            }

            let primary_key = is_primary_key(source);
            columns.push(ColumnDef {
                name,
                source_index: idx,
                column_type: if primary_key {
                    ColumnType::Integer
                } else {
                    column_type
                },
                primary_key,
            });
        }

        if columns.is_empty() {
            return Err(EtlError::SchemaError {
                message: format!("dataset for {} has no columns", table),
            });
        }

        Ok(Self {
            schema: sanitize_identifier(schema),
            table: sanitize_identifier(table),
            columns,
        })
    }

    pub fn qualified_name(&self) -> String {
        qualified_table(&self.schema, &self.table)
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    pub fn create_table_sql(&self) -> String {
        let definitions = self
            .columns
            .iter()
            .map(ColumnDef::definition)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({});",
            self.qualified_name(),
            definitions
        )
    }
}
