// ============================================================================
// 配置层：扩展配置（.platform-extension.yml）与项目配置（.platform-project.yml）
// 所有字段都带默认值，配置文件缺失时等价于空配置
// ============================================================================

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

/// 扩展配置文件候选名（按优先级）
pub const EXTENSION_CONFIG_FILES: &[&str] = &[".platform-extension.yml", ".platform-extension.yaml"];

/// 项目配置文件候选名（按优先级）
pub const PROJECT_CONFIG_FILES: &[&str] = &[".platform-project.yml", ".platform-project.yaml"];

fn default_true() -> bool {
    true
}

// ============================================================================
// 扩展配置
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ExtensionConfig {
    pub build: ExtensionBuildConfig,
    pub changelog: ChangelogConfig,
    pub validation: ValidationConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ExtensionBuildConfig {
    /// 同一扩展内额外声明的 bundle（各自生成独立的构建条目）
    pub extra_bundles: Vec<ExtraBundle>,
    pub zip: ZipConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ExtraBundle {
    #[serde(default)]
    pub name: Option<String>,
    pub path: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ZipConfig {
    pub composer: ComposerConfig,
    pub assets: AssetsConfig,
    pub pack: PackConfig,
    pub checksum: ChecksumConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ComposerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 额外从 require 移到 provide 的包名
    pub excluded_packages: Vec<String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        ComposerConfig {
            enabled: true,
            excluded_packages: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub enable_esbuild_for_admin: bool,
    pub enable_esbuild_for_storefront: bool,
    pub disable_sass: bool,
    pub npm_strict: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        AssetsConfig {
            enabled: true,
            enable_esbuild_for_admin: false,
            enable_esbuild_for_storefront: false,
            disable_sass: false,
            npm_strict: false,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PackConfig {
    pub excludes: PackExcludes,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct PackExcludes {
    pub paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ChecksumConfig {
    pub ignore: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ChangelogConfig {
    pub enabled: bool,
    /// 只保留 subject 匹配该正则的提交
    pub pattern: Option<String>,
    /// 每条提交的渲染模板，支持 {{ message }} / {{ hash }}
    pub template: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub ignore: Vec<String>,
}

impl ExtensionConfig {
    /// 从扩展根目录读取配置，文件不存在时返回默认配置
    pub fn load(extension_root: &Path) -> AppResult<Self> {
        match find_config_file(extension_root, EXTENSION_CONFIG_FILES) {
            Some(path) => parse_yaml_file(&path),
            None => Ok(ExtensionConfig::default()),
        }
    }
}

// ============================================================================
// 项目配置
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub build: ProjectBuildConfig,
    pub dump: DumpSection,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ProjectBuildConfig {
    /// 透传给 slow path 构建的 BROWSERSLIST
    pub browserslist: Option<String>,
    /// 已存在编译产物时跳过该扩展的构建
    pub skip_prebuilt_assets: bool,
    /// 即使存在编译产物也强制构建的扩展名
    pub force_extension_build: Vec<String>,
    /// 构建结束后保留 node_modules 的扩展名
    pub keep_node_modules: Vec<String>,
    /// 不参与构建的扩展名
    pub exclude_extensions: Vec<String>,
    pub disable_source_map: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct DumpSection {
    /// 表 → 列 → 改写表达式
    pub rewrite: IndexMap<String, IndexMap<String, String>>,
    /// 表 → WHERE 条件
    #[serde(rename = "where")]
    pub where_: IndexMap<String, String>,
    /// 只导出结构的表
    pub nodata: Vec<String>,
    /// 完全忽略的表
    pub ignore: Vec<String>,
}

impl ProjectConfig {
    /// 从项目根目录读取配置，文件不存在时返回默认配置
    pub fn load(project_root: &Path) -> AppResult<Self> {
        match find_config_file(project_root, PROJECT_CONFIG_FILES) {
            Some(path) => parse_yaml_file(&path),
            None => Ok(ProjectConfig::default()),
        }
    }
}

// ============================================================================
// 通用读取逻辑
// ============================================================================

fn find_config_file(dir: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn parse_yaml_file<T: for<'de> Deserialize<'de>>(path: &Path) -> AppResult<T> {
    let content =
        std::fs::read_to_string(path).map_err(|e| AppError::io("读取配置文件", path, e))?;
    if content.trim().is_empty() {
        return serde_yaml::from_str("{}").map_err(Into::into);
    }
    serde_yaml::from_str(&content)
        .map_err(|e| AppError::ConfigError(format!("{} 格式错误：{}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_extension_config_is_default() {
        let dir = TempDir::new().unwrap();
        let cfg = ExtensionConfig::load(dir.path()).unwrap();
        assert!(cfg.build.zip.composer.enabled);
        assert!(cfg.build.zip.assets.enabled);
        assert!(!cfg.build.zip.assets.enable_esbuild_for_admin);
    }

    #[test]
    fn test_extension_config_parses_nested_sections() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".platform-extension.yml"),
            r#"
build:
  extra_bundles:
    - path: src/Extra
    - name: Named
      path: src/Other
  zip:
    composer:
      excluded_packages: [vendor/lib]
    assets:
      enable_esbuild_for_admin: true
      npm_strict: true
    pack:
      excludes:
        paths: [docs]
    checksum:
      ignore: [src/Resources/big.bin]
changelog:
  enabled: true
validation:
  ignore: [metadata.icon]
"#,
        )
        .unwrap();

        let cfg = ExtensionConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.build.extra_bundles.len(), 2);
        assert_eq!(cfg.build.extra_bundles[1].name.as_deref(), Some("Named"));
        assert!(cfg.build.zip.composer.enabled);
        assert_eq!(cfg.build.zip.composer.excluded_packages, vec!["vendor/lib"]);
        assert!(cfg.build.zip.assets.enable_esbuild_for_admin);
        assert!(cfg.build.zip.assets.enabled);
        assert!(cfg.build.zip.assets.npm_strict);
        assert_eq!(cfg.build.zip.pack.excludes.paths, vec!["docs"]);
        assert!(cfg.changelog.enabled);
        assert_eq!(cfg.validation.ignore, vec!["metadata.icon"]);
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".platform-extension.yml"), "build: [unclosed").unwrap();
        let err = ExtensionConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));
    }

    #[test]
    fn test_project_config_dump_section() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(".platform-project.yml"),
            r#"
build:
  browserslist: "defaults"
  keep_node_modules: [SwagDemo]
dump:
  rewrite:
    customer:
      email: "'anon@example.com'"
  where:
    product: "id > 0"
  nodata: [cart]
  ignore: [log_entry]
"#,
        )
        .unwrap();
        let cfg = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.build.browserslist.as_deref(), Some("defaults"));
        assert_eq!(cfg.dump.rewrite["customer"]["email"], "'anon@example.com'");
        assert_eq!(cfg.dump.where_["product"], "id > 0");
        assert_eq!(cfg.dump.nodata, vec!["cart"]);
        assert_eq!(cfg.dump.ignore, vec!["log_entry"]);
    }

    #[test]
    fn test_empty_project_config_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".platform-project.yaml"), "").unwrap();
        assert_eq!(ProjectConfig::load(dir.path()).unwrap(), ProjectConfig::default());
    }
}
