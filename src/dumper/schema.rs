// ============================================================================
// 表结构缓存：一次性从 information_schema 批量读取全部表的结构
// ✅ 只能做：5 个批量查询 + 结果归并为 TableSchema
// ⛔ 禁止：逐表 SHOW CREATE TABLE（只有视图与触发器才回退到 SHOW CREATE）
// ============================================================================

use indexmap::IndexMap;

use crate::dumper::connection::{column_opt, column_str, DumpConnection, Row, SqlValue};
use crate::dumper::ddl::{is_hex_literal, unescape_expression};
use crate::utils::context::Context;
use crate::utils::error::AppResult;

/// 服务器新旧版本报告的排序规则名称不同，统一为旧名称
pub const COLLATION_ALIASES: &[(&str, &str)] = &[
    ("utf8mb3_general_ci", "utf8_general_ci"),
    ("utf8mb3_unicode_ci", "utf8_unicode_ci"),
    ("utf8mb3_unicode_520_ci", "utf8_unicode_520_ci"),
    ("utf8mb3_bin", "utf8_bin"),
];

pub fn normalize_collation(collation: &str) -> String {
    COLLATION_ALIASES
        .iter()
        .find(|(from, _)| *from == collation)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| collation.to_string())
}

/// 字符集取排序规则第一个下划线之前的部分
pub fn charset_of(collation: &str) -> String {
    collation.split('_').next().unwrap_or("").to_string()
}

/// 列默认值的几种来源
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// 没有 DEFAULT 子句
    Absent,
    /// DEFAULT NULL
    Null,
    Literal(String),
    /// MySQL 8 的 DEFAULT_GENERATED 表达式
    Expression(String),
    /// x'..' / 0x.. 原样输出
    HexLiteral(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    /// 完整类型，如 varchar(255) / int unsigned
    pub column_type: String,
    /// 基础类型，如 varchar / int
    pub data_type: String,
    pub nullable: bool,
    pub default: ColumnDefault,
    pub extra: String,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub comment: String,
    pub generation_expression: Option<String>,
    /// Some(true) 为 VIRTUAL，Some(false) 为 STORED
    pub virtual_generated: Option<bool>,
    /// 与列同名的 CHECK 约束
    pub check: Option<String>,
}

impl Column {
    pub fn is_generated(&self) -> bool {
        self.generation_expression.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexColumn {
    pub name: String,
    pub sub_part: Option<u64>,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub unique: bool,
    /// BTREE / FULLTEXT / SPATIAL / HASH
    pub index_type: String,
    pub columns: Vec<IndexColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckConstraint {
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSchema {
    pub name: String,
    pub engine: String,
    pub collation: String,
    pub charset: String,
    pub comment: String,
    pub row_format: String,
    pub auto_increment: Option<u64>,
    pub columns: Vec<Column>,
    pub primary_key: Vec<IndexColumn>,
    pub indexes: Vec<Index>,
    pub foreign_keys: Vec<ForeignKey>,
    /// 表级 CHECK 约束（与列同名的约束挂在列上）
    pub checks: Vec<CheckConstraint>,
}

/// 表名 → 结构，保持 information_schema 的表名顺序
pub type SchemaCache = IndexMap<String, TableSchema>;

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

fn tables_sql(db: &str) -> String {
    format!(
        "SELECT TABLE_NAME, ENGINE, TABLE_COLLATION, TABLE_COMMENT, ROW_FORMAT, AUTO_INCREMENT \
         FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = {} AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME",
        quote_literal(db)
    )
}

fn columns_sql(db: &str) -> String {
    format!(
        "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA, \
         CHARACTER_SET_NAME, COLLATION_NAME, COLUMN_COMMENT, GENERATION_EXPRESSION \
         FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = {} ORDER BY TABLE_NAME, ORDINAL_POSITION",
        quote_literal(db)
    )
}

fn indexes_sql(db: &str) -> String {
    format!(
        "SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, INDEX_TYPE, COLUMN_NAME, SUB_PART, COLLATION \
         FROM information_schema.STATISTICS \
         WHERE TABLE_SCHEMA = {} ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
        quote_literal(db)
    )
}

fn foreign_keys_sql(db: &str) -> String {
    format!(
        "SELECT kcu.TABLE_NAME, kcu.CONSTRAINT_NAME, kcu.COLUMN_NAME, kcu.REFERENCED_TABLE_NAME, \
         kcu.REFERENCED_COLUMN_NAME, rc.DELETE_RULE, rc.UPDATE_RULE \
         FROM information_schema.KEY_COLUMN_USAGE kcu \
         JOIN information_schema.REFERENTIAL_CONSTRAINTS rc \
         ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
         AND rc.TABLE_NAME = kcu.TABLE_NAME \
         WHERE kcu.TABLE_SCHEMA = {} AND kcu.REFERENCED_TABLE_NAME IS NOT NULL \
         ORDER BY kcu.TABLE_NAME, kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION",
        quote_literal(db)
    )
}

fn checks_sql(db: &str) -> String {
    format!(
        "SELECT tc.TABLE_NAME, cc.CONSTRAINT_NAME, cc.CHECK_CLAUSE \
         FROM information_schema.CHECK_CONSTRAINTS cc \
         JOIN information_schema.TABLE_CONSTRAINTS tc \
         ON tc.CONSTRAINT_SCHEMA = cc.CONSTRAINT_SCHEMA AND tc.CONSTRAINT_NAME = cc.CONSTRAINT_NAME \
         WHERE cc.CONSTRAINT_SCHEMA = {} AND tc.CONSTRAINT_TYPE = 'CHECK' \
         ORDER BY tc.TABLE_NAME, cc.CONSTRAINT_NAME",
        quote_literal(db)
    )
}

/// 一次性读取数据库内全部基础表的结构
///
/// CHECK 约束查询在不支持该特性的旧版本服务器上会失败，此时忽略。
pub fn prefetch_schema(ctx: &Context, conn: &mut dyn DumpConnection) -> AppResult<SchemaCache> {
    let db = conn.database().to_string();

    let mut cache = SchemaCache::new();
    apply_tables(&mut cache, &conn.query(ctx, &tables_sql(&db))?);
    apply_columns(&mut cache, &conn.query(ctx, &columns_sql(&db))?);
    apply_indexes(&mut cache, &conn.query(ctx, &indexes_sql(&db))?);
    apply_foreign_keys(&mut cache, &conn.query(ctx, &foreign_keys_sql(&db))?);
    match conn.query(ctx, &checks_sql(&db)) {
        Ok(rows) => apply_checks(&mut cache, &rows),
        Err(e) => log::debug!("读取 CHECK 约束失败，已忽略：{}", e),
    }

    log::info!("已读取 {} 张表的结构", cache.len());
    Ok(cache)
}

/// TABLE_NAME, ENGINE, TABLE_COLLATION, TABLE_COMMENT, ROW_FORMAT, AUTO_INCREMENT
pub fn apply_tables(cache: &mut SchemaCache, rows: &[Row]) {
    for row in rows {
        let name = column_str(row, 0);
        let collation = normalize_collation(&column_str(row, 2));
        let table = TableSchema {
            name: name.clone(),
            engine: column_str(row, 1),
            charset: charset_of(&collation),
            collation,
            comment: column_str(row, 3),
            row_format: column_str(row, 4),
            auto_increment: row.get(5).and_then(SqlValue::as_u64),
            ..TableSchema::default()
        };
        cache.insert(name, table);
    }
}

/// 清理 EXTRA：去掉 DEFAULT_GENERATED 与生成列标记，auto_increment 大写
pub fn normalize_extra(extra: &str) -> String {
    let mut out = extra.replace("DEFAULT_GENERATED", "");
    for marker in ["VIRTUAL GENERATED", "STORED GENERATED"] {
        out = out.replace(marker, "");
    }
    out = out.replace("auto_increment", "AUTO_INCREMENT");
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, DATA_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA,
/// CHARACTER_SET_NAME, COLLATION_NAME, COLUMN_COMMENT, GENERATION_EXPRESSION
pub fn apply_columns(cache: &mut SchemaCache, rows: &[Row]) {
    for row in rows {
        let Some(table) = cache.get_mut(&column_str(row, 0)) else {
            continue;
        };
        let raw_extra = column_str(row, 6);
        let nullable = column_str(row, 4).eq_ignore_ascii_case("YES");
        let generation = column_opt(row, 10)
            .filter(|g| !g.trim().is_empty())
            .map(|g| unescape_expression(&g));
        let virtual_generated = if raw_extra.contains("VIRTUAL GENERATED") {
            Some(true)
        } else if raw_extra.contains("STORED GENERATED") {
            Some(false)
        } else {
            None
        };

        let default = match column_opt(row, 5) {
            None if nullable && generation.is_none() => ColumnDefault::Null,
            None => ColumnDefault::Absent,
            Some(v) if is_hex_literal(&v) => ColumnDefault::HexLiteral(v),
            Some(v) if raw_extra.contains("DEFAULT_GENERATED") => {
                ColumnDefault::Expression(unescape_expression(&v))
            }
            Some(v) => ColumnDefault::Literal(v),
        };

        table.columns.push(Column {
            name: column_str(row, 1),
            column_type: column_str(row, 2),
            data_type: column_str(row, 3).to_lowercase(),
            nullable,
            default,
            extra: normalize_extra(&raw_extra),
            charset: column_opt(row, 7),
            collation: column_opt(row, 8).map(|c| normalize_collation(&c)),
            comment: column_str(row, 9),
            generation_expression: generation,
            virtual_generated,
            check: None,
        });
    }
}

/// TABLE_NAME, INDEX_NAME, NON_UNIQUE, INDEX_TYPE, COLUMN_NAME, SUB_PART, COLLATION
pub fn apply_indexes(cache: &mut SchemaCache, rows: &[Row]) {
    // (表, 索引名) → 索引，保持首次出现的顺序
    let mut grouped: IndexMap<(String, String), Index> = IndexMap::new();
    for row in rows {
        let key = (column_str(row, 0), column_str(row, 1));
        let column = IndexColumn {
            name: column_str(row, 4),
            sub_part: row.get(5).and_then(SqlValue::as_u64),
            descending: column_str(row, 6) == "D",
        };
        grouped
            .entry(key.clone())
            .or_insert_with(|| Index {
                name: key.1.clone(),
                unique: row.get(2).and_then(SqlValue::as_u64) == Some(0),
                index_type: column_str(row, 3).to_uppercase(),
                columns: Vec::new(),
            })
            .columns
            .push(column);
    }

    for ((table_name, index_name), index) in grouped {
        let Some(table) = cache.get_mut(&table_name) else {
            continue;
        };
        if index_name == "PRIMARY" {
            table.primary_key = index.columns;
        } else {
            table.indexes.push(index);
        }
    }
}

/// 纯数字的约束名是服务器自动生成的，恢复时不可用，改写为 fk.<表>.<首列>
pub fn foreign_key_name(constraint: &str, table: &str, first_column: &str) -> String {
    if !constraint.is_empty() && constraint.chars().all(|c| c.is_ascii_digit()) {
        format!("fk.{}.{}", table, first_column)
    } else {
        constraint.to_string()
    }
}

/// TABLE_NAME, CONSTRAINT_NAME, COLUMN_NAME, REFERENCED_TABLE_NAME, REFERENCED_COLUMN_NAME,
/// DELETE_RULE, UPDATE_RULE
pub fn apply_foreign_keys(cache: &mut SchemaCache, rows: &[Row]) {
    let mut grouped: IndexMap<(String, String), ForeignKey> = IndexMap::new();
    for row in rows {
        let key = (column_str(row, 0), column_str(row, 1));
        let fk = grouped.entry(key.clone()).or_insert_with(|| ForeignKey {
            name: key.1.clone(),
            columns: Vec::new(),
            referenced_table: column_str(row, 3),
            referenced_columns: Vec::new(),
            on_delete: column_str(row, 5).to_uppercase(),
            on_update: column_str(row, 6).to_uppercase(),
        });
        fk.columns.push(column_str(row, 2));
        fk.referenced_columns.push(column_str(row, 4));
    }

    for ((table_name, _), mut fk) in grouped {
        let Some(table) = cache.get_mut(&table_name) else {
            continue;
        };
        let first_column = fk.columns.first().cloned().unwrap_or_default();
        fk.name = foreign_key_name(&fk.name, &table_name, &first_column);
        table.foreign_keys.push(fk);
    }
}

/// TABLE_NAME, CONSTRAINT_NAME, CHECK_CLAUSE
pub fn apply_checks(cache: &mut SchemaCache, rows: &[Row]) {
    for row in rows {
        let Some(table) = cache.get_mut(&column_str(row, 0)) else {
            continue;
        };
        let name = column_str(row, 1);
        let expression = unescape_expression(&column_str(row, 2));

        let duplicate = table.checks.iter().any(|c| c.expression == expression)
            || table.columns.iter().any(|c| c.check.as_deref() == Some(expression.as_str()));
        if duplicate {
            continue;
        }

        if let Some(column) = table.columns.iter_mut().find(|c| c.name == name) {
            column.check = Some(expression);
        } else {
            table.checks.push(CheckConstraint { name, expression });
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::dumper::connection::testing::{t, FixtureConnection};

    fn n(value: u64) -> SqlValue {
        SqlValue::UInt(value)
    }

    /// customer / cart / order_line_item 三张表的 information_schema 结果
    pub fn shop_connection() -> FixtureConnection {
        FixtureConnection::new("shop")
            .respond(
                "information_schema.TABLES",
                vec![
                    vec![t("cart"), t("InnoDB"), t("utf8mb4_unicode_ci"), t(""), t("Dynamic"), SqlValue::Null],
                    vec![t("customer"), t("InnoDB"), t("utf8mb4_unicode_ci"), t("Shop customers"), t("Dynamic"), n(3)],
                    vec![t("order_line_item"), t("InnoDB"), t("utf8mb3_unicode_ci"), t(""), t("Compact"), n(1)],
                ],
            )
            .respond(
                "information_schema.COLUMNS",
                vec![
                    vec![t("cart"), t("token"), t("varchar(50)"), t("varchar"), t("NO"), SqlValue::Null, t(""), t("utf8mb4"), t("utf8mb4_unicode_ci"), t(""), t("")],
                    vec![t("cart"), t("payload"), t("longblob"), t("longblob"), t("NO"), SqlValue::Null, t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("customer"), t("id"), t("int unsigned"), t("int"), t("NO"), SqlValue::Null, t("auto_increment"), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("customer"), t("email"), t("varchar(254)"), t("varchar"), t("NO"), SqlValue::Null, t(""), t("utf8mb4"), t("utf8mb4_unicode_ci"), t("login"), t("")],
                    vec![t("customer"), t("first_name"), t("varchar(255)"), t("varchar"), t("YES"), SqlValue::Null, t(""), t("utf8mb4"), t("utf8mb4_bin"), t(""), t("")],
                    vec![t("customer"), t("custom_fields"), t("json"), t("json"), t("YES"), SqlValue::Null, t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("customer"), t("active"), t("tinyint(1)"), t("tinyint"), t("NO"), t("1"), t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("customer"), t("created_at"), t("datetime(3)"), t("datetime"), t("NO"), t("CURRENT_TIMESTAMP(3)"), t("DEFAULT_GENERATED"), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("customer"), t("full_name"), t("varchar(512)"), t("varchar"), t("YES"), SqlValue::Null, t("VIRTUAL GENERATED"), t("utf8mb4"), t("utf8mb4_unicode_ci"), t(""), t("concat(`first_name`,_utf8mb4\\' \\')")],
                    vec![t("order_line_item"), t("id"), t("binary(16)"), t("binary"), t("NO"), SqlValue::Null, t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("order_line_item"), t("customer_id"), t("int unsigned"), t("int"), t("YES"), SqlValue::Null, t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("order_line_item"), t("version_id"), t("binary(16)"), t("binary"), t("NO"), t("0x0fa91ce3e96a4bc2be4bd9ce752c3425"), t(""), SqlValue::Null, SqlValue::Null, t(""), t("")],
                    vec![t("order_line_item"), t("label"), t("varchar(255)"), t("varchar"), t("NO"), t("it's"), t(""), t("utf8mb3"), t("utf8mb3_unicode_ci"), t(""), t("")],
                ],
            )
            .respond(
                "information_schema.STATISTICS",
                vec![
                    vec![t("cart"), t("PRIMARY"), n(0), t("BTREE"), t("token"), SqlValue::Null, t("A")],
                    vec![t("customer"), t("PRIMARY"), n(0), t("BTREE"), t("id"), SqlValue::Null, t("A")],
                    vec![t("customer"), t("idx.name"), n(1), t("BTREE"), t("first_name"), n(10), t("A")],
                    vec![t("customer"), t("idx.name"), n(1), t("BTREE"), t("created_at"), SqlValue::Null, t("D")],
                    vec![t("customer"), t("uniq.email"), n(0), t("BTREE"), t("email"), SqlValue::Null, t("A")],
                    vec![t("order_line_item"), t("PRIMARY"), n(0), t("BTREE"), t("id"), SqlValue::Null, t("A")],
                    vec![t("order_line_item"), t("PRIMARY"), n(0), t("BTREE"), t("version_id"), SqlValue::Null, t("A")],
                ],
            )
            .respond(
                "information_schema.KEY_COLUMN_USAGE",
                vec![vec![
                    t("order_line_item"),
                    t("1"),
                    t("customer_id"),
                    t("customer"),
                    t("id"),
                    t("CASCADE"),
                    t("RESTRICT"),
                ]],
            )
            .respond(
                "information_schema.CHECK_CONSTRAINTS",
                vec![
                    vec![t("customer"), t("custom_fields"), t("json_valid(`custom_fields`)")],
                    vec![t("customer"), t("chk.active"), t("(`active` in (0,1))")],
                    vec![t("customer"), t("chk.active_dup"), t("(`active` in (0,1))")],
                ],
            )
    }
}
