//! DuckDB rendering of script statements.
//!
//! Identifiers are always double-quoted and literals single-quoted with
//! embedded quotes doubled, so rendered text stays well-formed whatever the
//! record values contain.

use std::path::Path;

use super::Statement;
use crate::{
    option::ROW_ID_COLUMN,
    table::{quote_identifier, quote_literal},
};

pub(super) fn render(statements: &[Statement]) -> Vec<String> {
    let mut lines = Vec::new();
    for statement in statements {
        render_into(statement, &mut lines);
    }
    lines
}

fn render_into(statement: &Statement, lines: &mut Vec<String>) {
    match statement {
        Statement::AttachStore { path, alias } => {
            lines.push("LOAD 'sqlite';".to_string());
            lines.push(format!(
                "ATTACH {} AS {} (TYPE sqlite);",
                path_literal(path),
                quote_identifier(alias)
            ));
        }
        Statement::UseStore { alias } => {
            lines.push(format!("USE {};", quote_identifier(alias)));
        }
        Statement::CreateLedger { ledger } => {
            lines.push(format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT, timestamp_ms BIGINT, file_name TEXT, \
                 table_name TEXT);",
                ledger.quoted()
            ));
        }
        Statement::Transaction { body, .. } => {
            lines.push("BEGIN TRANSACTION;".to_string());
            for inner in body {
                render_into(inner, lines);
            }
            lines.push("COMMIT;".to_string());
        }
        Statement::InsertRecord { ledger, record } => {
            lines.push(format!(
                "INSERT INTO {} (id, timestamp_ms, file_name, table_name) VALUES ({}, {}, {}, {});",
                ledger.quoted(),
                quote_literal(&record.id),
                record.timestamp_ms,
                quote_literal(&record.file_name),
                quote_literal(&record.table_name)
            ));
        }
        Statement::ExportColumnar {
            table,
            path,
            options,
        } => {
            lines.push(format!(
                "COPY (SELECT rowid AS {}, * FROM {}) TO {} (FORMAT PARQUET, COMPRESSION {}, \
                 ROW_GROUP_SIZE {});",
                quote_identifier(ROW_ID_COLUMN),
                table.quoted(),
                path_literal(path),
                options.compression.keyword(),
                options.row_group_size
            ));
        }
        Statement::DeleteArchived { table, path } => {
            lines.push(format!(
                "DELETE FROM {} AS tbl USING read_parquet({}) AS backup WHERE tbl.rowid = \
                 backup.{};",
                table.quoted(),
                path_literal(path),
                quote_identifier(ROW_ID_COLUMN)
            ));
        }
    }
}

fn path_literal(path: &Path) -> String {
    quote_literal(&path.to_string_lossy())
}
