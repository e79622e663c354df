// ============================================================================
// 导出配置：项目配置 + 命令行开关合并后的最终规则
// ✅ 只能做：合并 rewrite / where / nodata / ignore，展开 clean 与 anonymise
// ============================================================================

use indexmap::{IndexMap, IndexSet};

use crate::config::DumpSection;

/// 每条 INSERT 默认携带的行数
pub const DEFAULT_INSERT_INTO_LIMIT: usize = 100;

/// clean 模式下只导出结构的表（日志、队列、缓存类数据）
pub const CLEAN_NO_DATA_TABLES: &[&str] = &[
    "cart",
    "customer_recovery",
    "dead_message",
    "elasticsearch_index_task",
    "enqueue",
    "increment",
    "log_entry",
    "message_queue_stats",
    "notification",
    "payment_token",
    "product_export",
    "refresh_token",
    "version",
    "version_commit",
    "version_commit_data",
    "webhook_event_log",
];

/// anonymise 模式下只导出结构的表
pub const ANONYMISE_NO_DATA_TABLES: &[&str] = &["cart"];

/// anonymise 模式下的列改写：(表, 列, 表达式)
pub const ANONYMISE_REWRITES: &[(&str, &str, &str)] = &[
    ("customer", "first_name", "faker.Person.firstName()"),
    ("customer", "last_name", "faker.Person.lastName()"),
    ("customer", "email", "faker.Internet.email()"),
    ("customer", "company", "faker.Company.name()"),
    ("customer", "title", "faker.Person.title()"),
    ("customer", "remote_address", "faker.Internet.ipv4()"),
    ("customer_address", "first_name", "faker.Person.firstName()"),
    ("customer_address", "last_name", "faker.Person.lastName()"),
    ("customer_address", "company", "faker.Company.name()"),
    ("customer_address", "street", "faker.Address.streetAddress()"),
    ("customer_address", "zipcode", "faker.Address.postcode()"),
    ("customer_address", "city", "faker.Address.city()"),
    ("customer_address", "phone_number", "faker.Phone.number()"),
    ("order_customer", "first_name", "faker.Person.firstName()"),
    ("order_customer", "last_name", "faker.Person.lastName()"),
    ("order_customer", "email", "faker.Internet.email()"),
    ("order_customer", "company", "faker.Company.name()"),
    ("order_customer", "remote_address", "faker.Internet.ipv4()"),
    ("order_address", "first_name", "faker.Person.firstName()"),
    ("order_address", "last_name", "faker.Person.lastName()"),
    ("order_address", "company", "faker.Company.name()"),
    ("order_address", "street", "faker.Address.streetAddress()"),
    ("order_address", "zipcode", "faker.Address.postcode()"),
    ("order_address", "city", "faker.Address.city()"),
    ("order_address", "phone_number", "faker.Phone.number()"),
    ("newsletter_recipient", "email", "faker.Internet.email()"),
    ("newsletter_recipient", "first_name", "faker.Person.firstName()"),
    ("newsletter_recipient", "last_name", "faker.Person.lastName()"),
    ("newsletter_recipient", "street", "faker.Address.streetAddress()"),
    ("newsletter_recipient", "zip_code", "faker.Address.postcode()"),
    ("newsletter_recipient", "city", "faker.Address.city()"),
    ("product_review", "email", "faker.Internet.email()"),
    ("product_review", "external_user", "faker.Person.name()"),
    ("product_review", "external_email", "faker.Internet.email()"),
];

/// 一次导出的全部规则
#[derive(Debug, Clone, PartialEq)]
pub struct DumpConfig {
    /// 表 → 列 → 改写表达式
    pub rewrite: IndexMap<String, IndexMap<String, String>>,
    /// 表 → WHERE 条件
    pub where_: IndexMap<String, String>,
    pub no_data: IndexSet<String>,
    pub ignore: IndexSet<String>,
    /// 导出每张表前 FLUSH TABLES ... WITH READ LOCK
    pub lock_tables: bool,
    /// 每条 INSERT 只写一行
    pub quick: bool,
    pub insert_into_limit: usize,
    /// faker 的随机种子（每张表再按表名派生独立种子）
    pub seed: u64,
    /// 同时读取表数据的连接数，1 为串行
    pub parallel: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        DumpConfig {
            rewrite: IndexMap::new(),
            where_: IndexMap::new(),
            no_data: IndexSet::new(),
            ignore: IndexSet::new(),
            lock_tables: true,
            quick: false,
            insert_into_limit: DEFAULT_INSERT_INTO_LIMIT,
            seed: 0,
            parallel: 1,
        }
    }
}

impl DumpConfig {
    /// 从项目配置的 dump 段构造
    pub fn from_section(section: &DumpSection) -> Self {
        DumpConfig {
            rewrite: section.rewrite.clone(),
            where_: section.where_.clone(),
            no_data: section.nodata.iter().cloned().collect(),
            ignore: section.ignore.iter().cloned().collect(),
            ..DumpConfig::default()
        }
    }

    /// 展开 clean：日志与临时数据表只导出结构
    pub fn with_clean(mut self) -> Self {
        self.no_data
            .extend(CLEAN_NO_DATA_TABLES.iter().map(|t| t.to_string()));
        self
    }

    /// 展开 anonymise：个人信息列改写为 faker 生成值，已有的改写优先
    pub fn with_anonymise(mut self) -> Self {
        self.no_data
            .extend(ANONYMISE_NO_DATA_TABLES.iter().map(|t| t.to_string()));
        for (table, column, expression) in ANONYMISE_REWRITES {
            self.rewrite
                .entry(table.to_string())
                .or_default()
                .entry(column.to_string())
                .or_insert_with(|| expression.to_string());
        }
        self
    }

    /// 实际每条 INSERT 的行数（quick 时固定为 1）
    pub fn rows_per_insert(&self) -> usize {
        if self.quick {
            1
        } else {
            self.insert_into_limit.max(1)
        }
    }

    /// 实际使用的连接数（至少 1）
    pub fn workers(&self) -> usize {
        self.parallel.max(1)
    }

    pub fn rewrite_for(&self, table: &str, column: &str) -> Option<&str> {
        self.rewrite
            .get(table)
            .and_then(|columns| columns.get(column))
            .map(String::as_str)
    }

    pub fn where_for(&self, table: &str) -> Option<&str> {
        self.where_
            .get(table)
            .map(String::as_str)
            .filter(|w| !w.trim().is_empty())
    }

    pub fn is_ignored(&self, table: &str) -> bool {
        self.ignore.contains(table)
    }

    pub fn skips_data(&self, table: &str) -> bool {
        self.no_data.contains(table)
    }
}
