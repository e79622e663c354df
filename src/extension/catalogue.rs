// ============================================================================
// 平台版本目录：获取公开版本列表，计算满足约束的最低版本
// ✅ 只能做：HTTP 请求、JSON 解析、版本选择
// ============================================================================

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::extension::version::{Constraint, Version};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};

/// 默认的版本目录地址，可通过环境变量覆盖
pub const DEFAULT_CATALOGUE_URL: &str = "https://repo.packagist.org/p2/platform/core.json";

/// 覆盖版本目录地址的环境变量
pub const CATALOGUE_URL_ENV: &str = "PLATFORM_VERSION_CATALOGUE_URL";

/// 版本目录中的核心包名
pub const CORE_PACKAGE: &str = "platform/core";

/// 开发版本哨兵：目录为空或没有任何匹配时使用
pub const DEV_VERSION: &str = "6.6.9999999.9999999-dev";

/// 目录请求的默认超时
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// 版本目录响应：packages["platform/core"][].version_normalized
#[derive(Deserialize)]
struct CatalogueEnvelope {
    packages: HashMap<String, Vec<CatalogueEntry>>,
}

#[derive(Deserialize)]
struct CatalogueEntry {
    version_normalized: String,
}

/// 版本目录来源 trait
pub trait VersionCatalogue: Send + Sync {
    fn versions(&self, ctx: &Context) -> AppResult<Vec<Version>>;
}

/// 通过 HTTP 拉取的版本目录
pub struct HttpVersionCatalogue {
    url: String,
}

impl HttpVersionCatalogue {
    pub fn new(url: impl Into<String>) -> Self {
        HttpVersionCatalogue { url: url.into() }
    }

    /// 读取环境变量覆盖，否则使用默认地址
    pub fn from_env() -> Self {
        let url = std::env::var(CATALOGUE_URL_ENV)
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CATALOGUE_URL.to_string());
        HttpVersionCatalogue::new(url)
    }
}

impl VersionCatalogue for HttpVersionCatalogue {
    fn versions(&self, ctx: &Context) -> AppResult<Vec<Version>> {
        ctx.check()?;
        let timeout = ctx
            .remaining()
            .map(|r| r.min(FETCH_TIMEOUT))
            .unwrap_or(FETCH_TIMEOUT);

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::CatalogueError(format!("创建 HTTP 客户端失败：{}", e)))?;

        let resp = client
            .get(&self.url)
            .send()
            .map_err(|e| AppError::CatalogueError(format!("请求 {} 失败：{}", self.url, e)))?;

        if !resp.status().is_success() {
            return Err(AppError::CatalogueError(format!(
                "请求 {} 失败：HTTP {}",
                self.url,
                resp.status()
            )));
        }

        let body = resp
            .text()
            .map_err(|e| AppError::CatalogueError(format!("读取响应失败：{}", e)))?;
        parse_catalogue(&body)
    }
}

/// 固定版本列表（离线或测试使用）
pub struct StaticVersionCatalogue {
    versions: Vec<String>,
}

impl StaticVersionCatalogue {
    pub fn new<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticVersionCatalogue {
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }
}

impl VersionCatalogue for StaticVersionCatalogue {
    fn versions(&self, ctx: &Context) -> AppResult<Vec<Version>> {
        ctx.check()?;
        Ok(self
            .versions
            .iter()
            .filter_map(|v| Version::parse(v).ok())
            .collect())
    }
}

/// 解析版本目录 JSON，无法识别的版本号直接跳过
pub fn parse_catalogue(body: &str) -> AppResult<Vec<Version>> {
    let envelope: CatalogueEnvelope = serde_json::from_str(body)
        .map_err(|e| AppError::CatalogueError(format!("解析版本目录失败：{}", e)))?;

    let entries = envelope.packages.get(CORE_PACKAGE).ok_or_else(|| {
        AppError::CatalogueError(format!("版本目录中缺少 {}", CORE_PACKAGE))
    })?;

    let mut versions = Vec::with_capacity(entries.len());
    for entry in entries {
        match Version::parse(&entry.version_normalized) {
            Ok(v) => versions.push(v),
            Err(_) => log::debug!("跳过无法解析的版本：{}", entry.version_normalized),
        }
    }
    Ok(versions)
}

pub fn dev_version() -> Version {
    // 常量格式固定，解析失败只可能是代码错误
    Version::parse(DEV_VERSION).unwrap_or_else(|_| Version::new(6, 6, 9_999_999, 9_999_999))
}

/// 从版本列表中选出满足约束的最低版本
///
/// 优先返回最低的正式版；没有正式版时返回最低的预发布版；
/// 列表为空、没有约束或没有任何匹配时返回开发版本哨兵。
pub fn select_min_matching_version(versions: &[Version], constraint: Option<&Constraint>) -> Version {
    let Some(constraint) = constraint else {
        return dev_version();
    };

    let mut matching: Vec<&Version> = versions.iter().filter(|v| constraint.matches(v)).collect();
    matching.sort();

    if let Some(stable) = matching.iter().find(|v| !v.is_prerelease()) {
        return (*stable).clone();
    }
    match matching.first() {
        Some(pre) => (*pre).clone(),
        None => dev_version(),
    }
}

/// 拉取目录并计算最低匹配版本
pub fn lookup_min_matching_version(
    ctx: &Context,
    catalogue: &dyn VersionCatalogue,
    constraint: Option<&Constraint>,
) -> AppResult<Version> {
    if constraint.is_none() {
        return Ok(dev_version());
    }
    let versions = catalogue.versions(ctx)?;
    let version = select_min_matching_version(&versions, constraint);
    log::debug!(
        "约束 {} 的最低匹配版本：{}",
        constraint.map(|c| c.as_str()).unwrap_or("*"),
        version
    );
    Ok(version)
}

/// 6.6.0.0 起（含开发版本）storefront 使用嵌套输出目录
pub fn uses_nested_storefront_layout(version: &Version) -> bool {
    version >= &Version::new(6, 6, 0, 0) || version == &dev_version()
}
