// ============================================================================
// DDL 组装：由 TableSchema 重建 CREATE TABLE
// ✅ 只能做：纯字符串拼装，不访问数据库
// ============================================================================

use std::sync::LazyLock;

use regex::Regex;

use crate::dumper::schema::{
    charset_of, Column, ColumnDefault, ForeignKey, Index, IndexColumn, TableSchema,
};

/// 会携带字符集/排序规则的列类型
const STRING_TYPES: &[&str] = &[
    "char",
    "varchar",
    "tinytext",
    "text",
    "mediumtext",
    "longtext",
    "enum",
    "set",
];

const NUMERIC_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "mediumint",
    "int",
    "integer",
    "bigint",
    "decimal",
    "numeric",
    "float",
    "double",
    "real",
];

/// 以 0x 十六进制输出数据的列类型
pub const BINARY_TYPES: &[&str] = &[
    "binary",
    "varbinary",
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
    "bit",
    "geometry",
    "point",
    "linestring",
    "polygon",
];

/// 这两种引用动作是默认行为，不写出
const DEFAULT_REFERENTIAL_ACTIONS: &[&str] = &["RESTRICT", "NO ACTION"];

pub fn is_string_type(data_type: &str) -> bool {
    STRING_TYPES.contains(&data_type)
}

pub fn is_numeric_type(data_type: &str) -> bool {
    NUMERIC_TYPES.contains(&data_type)
}

pub fn is_binary_type(data_type: &str) -> bool {
    BINARY_TYPES.contains(&data_type)
}

static HEX_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[xX]'[0-9a-fA-F]*'|0x[0-9a-fA-F]+)$").unwrap());
static TEMPORAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:CURRENT_TIMESTAMP|NOW|LOCALTIME|LOCALTIMESTAMP|CURRENT_DATE|CURRENT_TIME)(?:\(\d*\))?$",
    )
    .unwrap()
});

/// x'..' 或 0x.. 形式的十六进制字面量
pub fn is_hex_literal(value: &str) -> bool {
    HEX_LITERAL_RE.is_match(value)
}

/// CURRENT_TIMESTAMP / NOW() 等时间函数
fn is_temporal_identifier(value: &str) -> bool {
    TEMPORAL_RE.is_match(value)
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// 按 mysqldump 的转义规则生成单引号字符串
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{1a}' => out.push_str("\\Z"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// information_schema 中的生成列表达式和 CHECK 子句是转义过的，还原为原文
pub fn unescape_expression(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn has_balanced_parens(value: &str) -> bool {
    if !value.contains('(') {
        return false;
    }
    let mut depth: i32 = 0;
    for c in value.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn is_wrapped(value: &str) -> bool {
    if !(value.starts_with('(') && value.ends_with(')')) {
        return false;
    }
    // 最外层括号必须在最后一个字符处闭合
    let mut depth = 0;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return i == value.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

/// 格式化列默认值
///
/// 规则依次为：NULL 原样、十六进制字面量原样、时间函数原样、
/// 含成对括号的表达式加括号、数值类型的数字不加引号、其余加引号转义。
pub fn format_default(value: &str, data_type: &str) -> String {
    if value.eq_ignore_ascii_case("NULL") {
        return "NULL".to_string();
    }
    if is_hex_literal(value) || is_temporal_identifier(value) {
        return value.to_string();
    }
    if has_balanced_parens(value) {
        return if is_wrapped(value) {
            value.to_string()
        } else {
            format!("({})", value)
        };
    }
    if is_numeric_type(data_type) && value.parse::<f64>().is_ok() {
        return value.to_string();
    }
    quote_string(value)
}

fn column_default(column: &Column) -> Option<String> {
    match &column.default {
        ColumnDefault::Absent => None,
        ColumnDefault::Null => Some("NULL".to_string()),
        ColumnDefault::HexLiteral(v) => Some(v.clone()),
        ColumnDefault::Literal(v) => Some(format_default(v, &column.data_type)),
        ColumnDefault::Expression(v) => {
            if is_temporal_identifier(v) || is_wrapped(v) {
                Some(v.clone())
            } else {
                Some(format!("({})", v))
            }
        }
    }
}

fn column_sql(column: &Column, table: &TableSchema) -> String {
    let mut sql = format!("{} {}", quote_identifier(&column.name), column.column_type);

    if is_string_type(&column.data_type) {
        if let Some(collation) = column.collation.as_deref().filter(|c| *c != table.collation) {
            let charset = column
                .charset
                .clone()
                .unwrap_or_else(|| charset_of(collation));
            sql.push_str(&format!(" CHARACTER SET {} COLLATE {}", charset, collation));
        }
    }

    if let Some(expression) = &column.generation_expression {
        let kind = if column.virtual_generated == Some(false) {
            "STORED"
        } else {
            "VIRTUAL"
        };
        sql.push_str(&format!(" GENERATED ALWAYS AS ({}) {}", expression, kind));
    } else {
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = column_default(column) {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
    }

    if !column.extra.is_empty() {
        sql.push(' ');
        sql.push_str(&column.extra);
    }
    if let Some(check) = &column.check {
        sql.push_str(&format!(" CHECK ({})", check));
    }
    if !column.comment.is_empty() {
        sql.push_str(&format!(" COMMENT {}", quote_string(&column.comment)));
    }
    sql
}

fn index_columns_sql(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            let mut part = quote_identifier(&c.name);
            if let Some(len) = c.sub_part {
                part.push_str(&format!("({})", len));
            }
            if c.descending {
                part.push_str(" DESC");
            }
            part
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn index_sql(index: &Index) -> String {
    let kind = match index.index_type.as_str() {
        "FULLTEXT" => "FULLTEXT KEY",
        "SPATIAL" => "SPATIAL KEY",
        _ if index.unique => "UNIQUE KEY",
        _ => "KEY",
    };
    format!(
        "{} {} ({})",
        kind,
        quote_identifier(&index.name),
        index_columns_sql(&index.columns)
    )
}

fn identifier_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Vec<_>>()
        .join(",")
}

fn foreign_key_sql(fk: &ForeignKey) -> String {
    let mut sql = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_identifier(&fk.name),
        identifier_list(&fk.columns),
        quote_identifier(&fk.referenced_table),
        identifier_list(&fk.referenced_columns)
    );
    for (clause, action) in [("ON DELETE", &fk.on_delete), ("ON UPDATE", &fk.on_update)] {
        if !action.is_empty() && !DEFAULT_REFERENTIAL_ACTIONS.contains(&action.as_str()) {
            sql.push_str(&format!(" {} {}", clause, action));
        }
    }
    sql
}

fn table_options_sql(table: &TableSchema) -> String {
    let mut options = Vec::new();
    if !table.engine.is_empty() {
        options.push(format!("ENGINE={}", table.engine));
    }
    if let Some(next) = table.auto_increment.filter(|n| *n > 1) {
        options.push(format!("AUTO_INCREMENT={}", next));
    }
    if !table.charset.is_empty() {
        options.push(format!("DEFAULT CHARSET={}", table.charset));
    }
    if !table.collation.is_empty() {
        options.push(format!("COLLATE={}", table.collation));
    }
    if !table.row_format.is_empty() && !table.row_format.eq_ignore_ascii_case("Dynamic") {
        options.push(format!("ROW_FORMAT={}", table.row_format.to_uppercase()));
    }
    if !table.comment.is_empty() {
        options.push(format!("COMMENT={}", quote_string(&table.comment)));
    }
    options.join(" ")
}

/// 组装完整的 CREATE TABLE 语句（含结尾分号）
pub fn create_table_sql(table: &TableSchema) -> String {
    let mut lines: Vec<String> = table.columns.iter().map(|c| column_sql(c, table)).collect();

    if !table.primary_key.is_empty() {
        lines.push(format!("PRIMARY KEY ({})", index_columns_sql(&table.primary_key)));
    }
    lines.extend(table.indexes.iter().map(index_sql));
    lines.extend(table.foreign_keys.iter().map(foreign_key_sql));
    lines.extend(table.checks.iter().map(|c| {
        format!("CONSTRAINT {} CHECK ({})", quote_identifier(&c.name), c.expression)
    }));

    let body = lines
        .iter()
        .map(|l| format!("  {}", l))
        .collect::<Vec<_>>()
        .join(",\n");
    let options = table_options_sql(table);
    if options.is_empty() {
        format!("CREATE TABLE {} (\n{}\n);", quote_identifier(&table.name), body)
    } else {
        format!(
            "CREATE TABLE {} (\n{}\n) {};",
            quote_identifier(&table.name),
            body,
            options
        )
    }
}
