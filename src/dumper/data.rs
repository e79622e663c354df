// ============================================================================
// 表数据导出：按列改写、过滤并分批写出 INSERT
// ✅ 只能做：读取数据行、格式化值、写出流
// ⛔ 禁止：修改源库数据（锁表语句除外）
// ============================================================================

use std::io::Write;

use crate::dumper::config::DumpConfig;
use crate::dumper::connection::{DumpConnection, SqlValue};
use crate::dumper::ddl::{is_binary_type, is_numeric_type, quote_identifier, quote_string};
use crate::dumper::faker::{is_faker_expression, Faker};
use crate::dumper::schema::{Column, TableSchema};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};

/// 权限不足时 MySQL 返回的错误片段
const PRIVILEGE_ERROR_MARKERS: &[&str] = &["RELOAD", "1227", "Access denied", "access denied"];

/// 参与导出的一列：结构 + 是否为 faker 改写
struct SelectedColumn<'a> {
    column: &'a Column,
    rewrite: Option<&'a str>,
}

impl SelectedColumn<'_> {
    fn is_faker(&self) -> bool {
        self.rewrite.is_some_and(is_faker_expression)
    }

    fn select_expression(&self) -> String {
        let name = quote_identifier(&self.column.name);
        match self.rewrite {
            // faker 表达式作为字符串原样取回，写出时再求值
            Some(expr) if is_faker_expression(expr) => {
                format!("{} AS {}", quote_string(expr), name)
            }
            Some(expr) => format!("{} AS {}", expr, name),
            None => name,
        }
    }
}

fn hex_literal(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "''".to_string();
    }
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn format_value(selected: &SelectedColumn, value: SqlValue, faker: &mut Faker) -> AppResult<String> {
    let column = selected.column;
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Int(i) => Ok(i.to_string()),
        SqlValue::UInt(u) => Ok(u.to_string()),
        SqlValue::Double(d) => Ok(d.to_string()),
        SqlValue::Bytes(bytes) => {
            if selected.is_faker() {
                let text = String::from_utf8_lossy(&bytes);
                if is_faker_expression(&text) {
                    return Ok(quote_string(&faker.evaluate(&text)?));
                }
                return Ok(quote_string(&text));
            }
            if selected.rewrite.is_none() && is_binary_type(&column.data_type) {
                return Ok(hex_literal(&bytes));
            }
            let text = String::from_utf8_lossy(&bytes);
            if selected.rewrite.is_none()
                && is_numeric_type(&column.data_type)
                && text.parse::<f64>().is_ok()
            {
                return Ok(text.to_string());
            }
            Ok(quote_string(&text))
        }
    }
}

fn with_where(sql: String, predicate: Option<&str>) -> String {
    match predicate {
        Some(w) => format!("{} WHERE {}", sql, w),
        None => sql,
    }
}

fn lock_table(ctx: &Context, conn: &mut dyn DumpConnection, table: &str) -> AppResult<()> {
    let sql = format!("FLUSH TABLES {} WITH READ LOCK", quote_identifier(table));
    conn.execute(ctx, &sql).map_err(|e| {
        let message = e.to_string();
        if PRIVILEGE_ERROR_MARKERS.iter().any(|m| message.contains(m)) {
            AppError::DatabaseError(format!(
                "锁定表 {} 失败：{}。当前用户没有 RELOAD 权限，请加上 --skip-lock-tables 关闭锁表后重试",
                table, message
            ))
        } else {
            e
        }
    })
}

/// 导出一张表的数据
///
/// # 参数
/// - `table`: 预读取的表结构
/// - `faker`: 整个导出共用的生成器，保证同一种子下结果可复现
///
/// # 返回
/// 写出的行数
pub fn dump_table_data(
    ctx: &Context,
    conn: &mut dyn DumpConnection,
    table: &TableSchema,
    config: &DumpConfig,
    faker: &mut Faker,
    out: &mut dyn Write,
) -> AppResult<u64> {
    let name = quote_identifier(&table.name);
    let predicate = config.where_for(&table.name);

    if config.lock_tables {
        lock_table(ctx, conn, &table.name)?;
    }

    let count_sql = with_where(format!("SELECT COUNT(*) FROM {}", name), predicate);
    let total = conn
        .query(ctx, &count_sql)?
        .first()
        .and_then(|row| row.first())
        .and_then(SqlValue::as_u64)
        .unwrap_or(0);

    writeln!(out, "--")?;
    writeln!(out, "-- Data for table {} ({} rows)", name, total)?;
    writeln!(out, "--")?;
    writeln!(out)?;
    if config.lock_tables {
        writeln!(out, "LOCK TABLES {} WRITE;", name)?;
    }

    let selected: Vec<SelectedColumn> = table
        .columns
        .iter()
        .filter(|c| !c.is_generated())
        .map(|column| SelectedColumn {
            column,
            rewrite: config.rewrite_for(&table.name, &column.name),
        })
        .collect();

    let column_list = selected
        .iter()
        .map(|s| quote_identifier(&s.column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let select_sql = with_where(
        format!(
            "SELECT {} FROM {}",
            selected
                .iter()
                .map(SelectedColumn::select_expression)
                .collect::<Vec<_>>()
                .join(", "),
            name
        ),
        predicate,
    );

    let limit = config.rows_per_insert();
    let mut batch: Vec<String> = Vec::with_capacity(limit);
    let mut written: u64 = 0;

    let flush = |batch: &mut Vec<String>, out: &mut dyn Write| -> AppResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        writeln!(
            out,
            "INSERT INTO {} ({}) VALUES {};",
            name,
            column_list,
            batch.join(",")
        )?;
        batch.clear();
        Ok(())
    };

    if !selected.is_empty() {
        conn.for_each_row(ctx, &select_sql, &mut |row| {
            let mut values = Vec::with_capacity(selected.len());
            for (s, value) in selected.iter().zip(row) {
                values.push(format_value(s, value, faker)?);
            }
            batch.push(format!("({})", values.join(",")));
            written += 1;
            if batch.len() >= limit {
                flush(&mut batch, out)?;
            }
            Ok(())
        })?;
        flush(&mut batch, out)?;
    }

    if config.lock_tables {
        writeln!(out, "UNLOCK TABLES;")?;
        conn.execute(ctx, "UNLOCK TABLES")?;
    }
    writeln!(out)?;

    log::debug!("表 {} 导出 {} 行", table.name, written);
    Ok(written)
}
