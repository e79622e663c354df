// ============================================================================
// 数据传输对象（DTO）定义
// 扫描器产出、构建器与安装器消费的数据结构，仅包含字段定义和序列化派生
// ⛔ 禁止：包含复杂的业务逻辑方法
// ============================================================================

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// 可构建单元，由扩展展开得到（extra bundle 会额外产生多个 Source）
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Source {
    pub name: String,
    /// 含 Resources/ 的源码目录
    pub path: PathBuf,
    pub admin_fast_build: bool,
    pub storefront_fast_build: bool,
    pub disable_css_preprocessor: bool,
    pub strict_production_install: bool,
}

/// 管理后台构建目标
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdministrationTarget {
    /// 相对 basePath 的源码目录
    pub path: String,
    /// 入口文件存在时才有值
    pub entry_file_path: Option<String>,
    /// webpack 配置存在时才有值
    pub webpack: Option<String>,
}

/// 店面构建目标
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorefrontTarget {
    pub path: String,
    pub entry_file_path: Option<String>,
    pub webpack: Option<String>,
    /// 基础样式文件（绝对路径）
    pub style_files: Vec<String>,
}

/// 单个 Source 的构建配置，写入工作区的 var/plugins.json
///
/// 除 `base_path` 外所有路径都相对于 `base_path`。
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfigEntry {
    /// 规范化的绝对路径，带结尾分隔符
    pub base_path: String,
    pub views: Vec<String>,
    pub technical_name: String,
    pub administration: AdministrationTarget,
    pub storefront: StorefrontTarget,
    pub fast_build_for_admin: bool,
    pub fast_build_for_storefront: bool,
    pub disable_css_preprocessor: bool,
    pub strict_production_install: bool,
}

/// 扫描结果：名称 → 构建配置，保持发现顺序
pub type BuildConfigMap = IndexMap<String, BuildConfigEntry>;

/// 构建目标
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AssetTarget {
    Administration,
    Storefront,
}

impl AssetTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetTarget::Administration => "administration",
            AssetTarget::Storefront => "storefront",
        }
    }
}

/// 扫描中单个扩展的失败记录，扫描本身继续
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub message: String,
}

/// 打包结果
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct PackResult {
    /// 生成的 ZIP 文件完整路径
    pub zip_path: PathBuf,
    pub extension_name: String,
    /// 归档对应的 git 标签或分支，为空表示直接复制的目录
    pub tag: String,
    pub file_count: usize,
}

/// 校验问题
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ValidationIssue {
    /// 检查项标识，可在 validation.ignore 中忽略
    pub identifier: String,
    pub message: String,
}
