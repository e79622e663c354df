// ============================================================================
// 数据库导出：由 information_schema 重建结构，流式写出数据
// ✅ 只能做：组织导出顺序（头部 → 表结构与数据 → 视图 → 触发器 → 尾部）
// ⛔ 禁止：在此处拼装单表 DDL 或格式化数据值
// ============================================================================

pub mod config;
pub mod connection;
pub mod data;
pub mod ddl;
pub mod faker;
pub mod schema;
pub mod writer;

use std::io::{Seek, SeekFrom, Write};
use std::sync::LazyLock;

use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use tempfile::SpooledTempFile;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use xxhash_rust::xxh3::xxh3_64;

use crate::dumper::config::DumpConfig;
use crate::dumper::connection::{column_str, ConnectionFactory, DumpConnection};
use crate::dumper::ddl::{create_table_sql, quote_identifier};
use crate::dumper::faker::Faker;
use crate::dumper::schema::{prefetch_schema, TableSchema};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};

/// 单表数据超过此大小时暂存到磁盘
const SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

static DEFINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DEFINER=(`[^`]*`|'[^']*'|[^@\s]+)@(`[^`]*`|'[^']*'|\S+)\s*").unwrap()
});

/// 一次导出的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DumpStats {
    pub tables: usize,
    pub rows: u64,
    pub views: usize,
    pub triggers: usize,
}

/// 去掉 CREATE VIEW / CREATE TRIGGER 中的 DEFINER 子句
pub fn strip_definer(sql: &str) -> String {
    DEFINER_RE.replace_all(sql, "").to_string()
}

fn write_header(ctx: &Context, conn: &mut dyn DumpConnection, out: &mut dyn Write) -> AppResult<()> {
    let server_version = conn
        .query(ctx, "SELECT VERSION()")?
        .first()
        .map(|row| column_str(row, 0))
        .unwrap_or_default();
    let generated_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    writeln!(out, "-- Database: {}", conn.database())?;
    writeln!(out, "-- Server version: {}", server_version)?;
    writeln!(out, "-- Generated at: {}", generated_at)?;
    writeln!(out)?;
    writeln!(out, "SET NAMES utf8mb4;")?;
    writeln!(out, "SET FOREIGN_KEY_CHECKS = 0;")?;
    writeln!(out)?;
    Ok(())
}

fn dump_views(ctx: &Context, conn: &mut dyn DumpConnection, config: &DumpConfig, out: &mut dyn Write) -> AppResult<usize> {
    let views = conn.query(ctx, "SHOW FULL TABLES WHERE Table_type = 'VIEW'")?;
    let mut count = 0;
    for row in views {
        let name = column_str(&row, 0);
        if config.is_ignored(&name) {
            continue;
        }
        let quoted = quote_identifier(&name);
        let create = conn.query(ctx, &format!("SHOW CREATE VIEW {}", quoted))?;
        let Some(sql) = create.first().map(|r| column_str(r, 1)) else {
            return Err(AppError::DatabaseError(format!("SHOW CREATE VIEW {} 没有返回结果", name)));
        };

        writeln!(out, "--")?;
        writeln!(out, "-- View {}", quoted)?;
        writeln!(out, "--")?;
        writeln!(out)?;
        writeln!(out, "DROP VIEW IF EXISTS {};", quoted)?;
        writeln!(out, "{};", strip_definer(&sql))?;
        writeln!(out)?;
        count += 1;
    }
    Ok(count)
}

fn dump_triggers(ctx: &Context, conn: &mut dyn DumpConnection, config: &DumpConfig, out: &mut dyn Write) -> AppResult<usize> {
    // SHOW TRIGGERS: Trigger, Event, Table, ...
    let triggers = conn.query(ctx, "SHOW TRIGGERS")?;
    let mut count = 0;
    for row in triggers {
        let name = column_str(&row, 0);
        if config.is_ignored(&column_str(&row, 2)) {
            continue;
        }
        let quoted = quote_identifier(&name);
        let create = conn.query(ctx, &format!("SHOW CREATE TRIGGER {}", quoted))?;
        let Some(sql) = create.first().map(|r| column_str(r, 2)) else {
            return Err(AppError::DatabaseError(format!("SHOW CREATE TRIGGER {} 没有返回结果", name)));
        };

        writeln!(out, "DELIMITER //")?;
        writeln!(out, "{} //", strip_definer(&sql))?;
        writeln!(out, "DELIMITER ;")?;
        writeln!(out)?;
        count += 1;
    }
    Ok(count)
}

/// 导出整个数据库（单连接串行）
pub fn dump_database(
    ctx: &Context,
    conn: &mut dyn DumpConnection,
    config: &DumpConfig,
    out: &mut dyn Write,
) -> AppResult<DumpStats> {
    dump_database_with(ctx, conn, None, config, out)
}

/// 导出整个数据库
///
/// 出错时立即返回，已写出的部分保留在输出流中。
/// `config.parallel > 1` 且提供了连接工厂时，表数据由多个连接并行读取，
/// 输出仍严格按表顺序写出，与串行导出逐字节一致。
///
/// # 参数
/// - `conn`: 已连接到目标库的连接（结构、视图、触发器都走这个连接）
/// - `factory`: 并行读取表数据时打开新连接
/// - `config`: 合并后的导出规则
/// - `out`: 输出流（调用方负责压缩包装与 finish）
pub fn dump_database_with(
    ctx: &Context,
    conn: &mut dyn DumpConnection,
    factory: Option<&dyn ConnectionFactory>,
    config: &DumpConfig,
    out: &mut dyn Write,
) -> AppResult<DumpStats> {
    log::info!("开始导出数据库 {}", conn.database());
    let cache = prefetch_schema(ctx, conn)?;
    let mut stats = DumpStats::default();

    write_header(ctx, conn, out)?;

    let tables: Vec<&TableSchema> = cache
        .iter()
        .filter(|(name, _)| {
            let ignored = config.is_ignored(name);
            if ignored {
                log::debug!("跳过忽略的表 {}", name);
            }
            !ignored
        })
        .map(|(_, table)| table)
        .collect();

    match factory.filter(|_| config.workers() > 1) {
        Some(factory) => dump_tables_parallel(ctx, factory, &tables, config, out, &mut stats)?,
        None => {
            for table in &tables {
                ctx.check()?;
                write_structure(table, out)?;
                stats.tables += 1;
                if config.skips_data(&table.name) {
                    continue;
                }
                let mut faker = table_faker(config, &table.name);
                stats.rows += data::dump_table_data(ctx, conn, table, config, &mut faker, out)?;
            }
        }
    }

    stats.views = dump_views(ctx, conn, config, out)?;
    stats.triggers = dump_triggers(ctx, conn, config, out)?;

    writeln!(out, "SET FOREIGN_KEY_CHECKS = 1;")?;
    out.flush()?;

    log::info!(
        "导出完成：{} 张表，{} 行数据，{} 个视图，{} 个触发器",
        stats.tables,
        stats.rows,
        stats.views,
        stats.triggers
    );
    Ok(stats)
}

fn write_structure(table: &TableSchema, out: &mut dyn Write) -> AppResult<()> {
    let quoted = quote_identifier(&table.name);
    writeln!(out, "--")?;
    writeln!(out, "-- Table structure for {}", quoted)?;
    writeln!(out, "--")?;
    writeln!(out)?;
    writeln!(out, "DROP TABLE IF EXISTS {};", quoted)?;
    writeln!(out, "{}", create_table_sql(table))?;
    writeln!(out)?;
    Ok(())
}

/// 每张表独立的生成器，结果与表的处理顺序、所在线程无关
fn table_faker(config: &DumpConfig, table: &str) -> Faker {
    Faker::seeded(config.seed ^ xxh3_64(table.as_bytes()))
}

/// 按窗口并行读取表数据
///
/// 每个窗口内的表各自打开连接，数据先写入暂存文件（小表留在内存），
/// 整个窗口完成后按表顺序拷贝到输出流。
fn dump_tables_parallel(
    ctx: &Context,
    factory: &dyn ConnectionFactory,
    tables: &[&TableSchema],
    config: &DumpConfig,
    out: &mut dyn Write,
    stats: &mut DumpStats,
) -> AppResult<()> {
    let workers = config.workers();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| AppError::DatabaseError(format!("创建导出线程池失败：{}", e)))?;
    log::info!("使用 {} 个连接并行导出表数据", workers);

    for window in tables.chunks(workers) {
        ctx.check()?;
        let chunks: Vec<AppResult<Option<(SpooledTempFile, u64)>>> = pool.install(|| {
            window
                .par_iter()
                .map(|table| -> AppResult<Option<(SpooledTempFile, u64)>> {
                    if config.skips_data(&table.name) {
                        return Ok(None);
                    }
                    let mut conn = factory.open()?;
                    let mut spool = SpooledTempFile::new(SPOOL_THRESHOLD);
                    let mut faker = table_faker(config, &table.name);
                    let rows = data::dump_table_data(
                        ctx,
                        conn.as_mut(),
                        table,
                        config,
                        &mut faker,
                        &mut spool,
                    )?;
                    Ok(Some((spool, rows)))
                })
                .collect()
        });

        for (table, chunk) in window.iter().zip(chunks) {
            write_structure(table, out)?;
            stats.tables += 1;
            if let Some((mut spool, rows)) = chunk? {
                spool.seek(SeekFrom::Start(0))?;
                std::io::copy(&mut spool, out)?;
                stats.rows += rows;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dumper::connection::testing::t;
    use crate::dumper::connection::SqlValue;
    use crate::dumper::schema::fixtures::shop_connection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn run(conn: &mut connection::testing::FixtureConnection, config: &DumpConfig) -> (String, DumpStats) {
        let mut out: Vec<u8> = Vec::new();
        let stats = dump_database(&Context::new(), conn, config, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), stats)
    }

    #[test]
    fn test_anonymised_dump_rewrites_email_and_skips_cart_data() {
        let mut conn = shop_connection()
            .respond("SELECT VERSION()", vec![vec![t("8.0.36")]])
            .respond("COUNT(*) FROM `customer`", vec![vec![SqlValue::UInt(2)]])
            .respond(
                "FROM `customer`",
                vec![
                    vec![
                        SqlValue::UInt(1),
                        t("faker.Internet.email()"),
                        t("faker.Person.firstName()"),
                        SqlValue::Null,
                        SqlValue::Int(1),
                        t("2024-01-01 00:00:00.000"),
                    ],
                    vec![
                        SqlValue::UInt(2),
                        t("faker.Internet.email()"),
                        t("faker.Person.firstName()"),
                        SqlValue::Null,
                        SqlValue::Int(0),
                        t("2024-01-02 00:00:00.000"),
                    ],
                ],
            );
        let config = DumpConfig {
            lock_tables: false,
            ..DumpConfig::default()
        }
        .with_anonymise();

        let (text, stats) = run(&mut conn, &config);

        assert!(text.starts_with("-- Database: shop\n-- Server version: 8.0.36\n"));
        assert!(text.contains("SET NAMES utf8mb4;\nSET FOREIGN_KEY_CHECKS = 0;"));
        assert!(text.trim_end().ends_with("SET FOREIGN_KEY_CHECKS = 1;"));

        assert!(text.contains("DROP TABLE IF EXISTS `cart`;\nCREATE TABLE `cart`"));
        assert!(!text.contains("INSERT INTO `cart`"));
        assert!(conn.executed().iter().all(|sql| !sql.contains("FROM `cart`")));

        let inserts: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("INSERT INTO `customer`"))
            .collect();
        assert_eq!(inserts.len(), 1);
        assert!(!inserts[0].contains("faker."));
        assert_eq!(inserts[0].matches("@example.").count(), 2);
        assert_eq!(stats.tables, 3);
        assert_eq!(stats.rows, 2);
    }

    fn data_connection() -> connection::testing::FixtureConnection {
        shop_connection()
            .respond("SELECT VERSION()", vec![vec![t("8.0.36")]])
            .respond("COUNT(*) FROM `customer`", vec![vec![SqlValue::UInt(2)]])
            .respond(
                "FROM `customer`",
                vec![
                    vec![
                        SqlValue::UInt(1),
                        t("faker.Internet.email()"),
                        t("faker.Person.firstName()"),
                        SqlValue::Null,
                        SqlValue::Int(1),
                        t("2024-01-01 00:00:00.000"),
                    ],
                    vec![
                        SqlValue::UInt(2),
                        t("faker.Internet.email()"),
                        t("faker.Person.firstName()"),
                        t("ACME"),
                        SqlValue::Int(0),
                        t("2024-01-02 00:00:00.000"),
                    ],
                ],
            )
            .respond("COUNT(*) FROM `order_line_item`", vec![vec![SqlValue::UInt(1)]])
            .respond(
                "FROM `order_line_item`",
                vec![vec![
                    SqlValue::Bytes(vec![0xde, 0xad]),
                    SqlValue::Null,
                    SqlValue::Bytes(vec![]),
                    t("it's"),
                ]],
            )
    }

    fn without_timestamp(text: &str) -> String {
        text.lines()
            .filter(|l| !l.starts_with("-- Generated at:"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_parallel_dump_matches_serial_output() {
        let config = DumpConfig::default().with_anonymise();
        let (serial, serial_stats) = run(&mut data_connection(), &config);

        let opened = AtomicUsize::new(0);
        let open_connection = || -> AppResult<Box<dyn DumpConnection + Send>> {
            opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(data_connection()))
        };
        let factory: &dyn ConnectionFactory = &open_connection;
        let parallel_config = DumpConfig {
            parallel: 3,
            ..config
        };

        let mut out: Vec<u8> = Vec::new();
        let stats = dump_database_with(
            &Context::new(),
            &mut data_connection(),
            Some(factory),
            &parallel_config,
            &mut out,
        )
        .unwrap();
        let parallel = String::from_utf8(out).unwrap();

        assert!(parallel.contains("INSERT INTO `customer`"));
        assert!(parallel.contains("INSERT INTO `order_line_item`"));
        assert_eq!(without_timestamp(&parallel), without_timestamp(&serial));
        assert_eq!(stats, serial_stats);
        // cart 只导出结构，不会为它打开连接
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parallel_without_factory_stays_serial() {
        let config = DumpConfig {
            parallel: 4,
            lock_tables: false,
            ..DumpConfig::default()
        };
        let (text, stats) = run(&mut data_connection(), &config);
        assert!(text.contains("INSERT INTO `customer`"));
        assert_eq!(stats.rows, 3);
    }

    #[test]
    fn test_ignored_tables_are_absent() {
        let mut conn = shop_connection();
        let mut config = DumpConfig {
            lock_tables: false,
            ..DumpConfig::default()
        };
        config.ignore.insert("order_line_item".into());

        let (text, stats) = run(&mut conn, &config);
        assert!(!text.contains("`order_line_item`"));
        assert_eq!(stats.tables, 2);
    }

    #[test]
    fn test_views_and_triggers() {
        let mut conn = shop_connection()
            .respond("SHOW FULL TABLES", vec![vec![t("customer_view"), t("VIEW")]])
            .respond(
                "SHOW CREATE VIEW",
                vec![vec![
                    t("customer_view"),
                    t("CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW `customer_view` AS select 1 AS `x`"),
                    t("utf8mb4"),
                    t("utf8mb4_unicode_ci"),
                ]],
            )
            .respond("SHOW TRIGGERS", vec![vec![t("customer_bi"), t("INSERT"), t("customer")]])
            .respond(
                "SHOW CREATE TRIGGER",
                vec![vec![
                    t("customer_bi"),
                    t("STRICT_TRANS_TABLES"),
                    t("CREATE DEFINER=`app`@`localhost` TRIGGER `customer_bi` BEFORE INSERT ON `customer` FOR EACH ROW SET NEW.active = 1"),
                ]],
            );
        let config = DumpConfig {
            lock_tables: false,
            ..DumpConfig::default()
        };

        let (text, stats) = run(&mut conn, &config);
        assert!(text.contains(
            "DROP VIEW IF EXISTS `customer_view`;\nCREATE ALGORITHM=UNDEFINED SQL SECURITY DEFINER VIEW `customer_view` AS select 1 AS `x`;"
        ));
        assert!(text.contains(
            "DELIMITER //\nCREATE TRIGGER `customer_bi` BEFORE INSERT ON `customer` FOR EACH ROW SET NEW.active = 1 //\nDELIMITER ;"
        ));
        assert_eq!((stats.views, stats.triggers), (1, 1));
    }

    #[test]
    fn test_strip_definer_forms() {
        assert_eq!(
            strip_definer("CREATE DEFINER='a'@'b' VIEW v"),
            "CREATE VIEW v"
        );
        assert_eq!(
            strip_definer("CREATE DEFINER=root@localhost TRIGGER t"),
            "CREATE TRIGGER t"
        );
    }

    #[test]
    fn test_cancelled_context_stops_dump() {
        let ctx = Context::new();
        ctx.cancel();
        let mut out: Vec<u8> = Vec::new();
        let err = dump_database(&ctx, &mut shop_connection(), &DumpConfig::default(), &mut out).unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
