// ============================================================================
// composer.json 描述的扩展：platform-plugin 与 platform-bundle
// ============================================================================

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::utils::error::{AppError, AppResult};

pub const COMPOSER_FILE: &str = "composer.json";

pub const PLUGIN_TYPE: &str = "platform-plugin";

pub const BUNDLE_TYPE: &str = "platform-bundle";

/// 插件图标的默认位置（相对于源码目录）
pub const DEFAULT_PLUGIN_ICON: &str = "Resources/config/plugin.png";

/// composer.json 中工具关心的字段，其余字段保持原样不解析
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ComposerManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub license: Option<Value>,
    pub require: IndexMap<String, String>,
    pub extra: ComposerExtra,
    pub autoload: ComposerAutoload,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ComposerExtra {
    #[serde(rename = "plugin-class")]
    pub plugin_class: Option<String>,
    #[serde(rename = "bundle-name")]
    pub bundle_name: Option<String>,
    #[serde(rename = "plugin-icon")]
    pub plugin_icon: Option<String>,
    pub label: IndexMap<String, String>,
    pub description: IndexMap<String, String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ComposerAutoload {
    /// 命名空间 → 目录（字符串或字符串数组）
    #[serde(rename = "psr-4")]
    pub psr4: IndexMap<String, Value>,
}

impl ComposerManifest {
    /// license 可能是字符串或数组，取第一个
    pub fn license(&self) -> Option<&str> {
        match self.license.as_ref()? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// psr-4 声明的全部源码目录，未声明时为 src/
    pub fn source_dirs(&self) -> Vec<String> {
        let mut dirs: Vec<String> = Vec::new();
        for value in self.autoload.psr4.values() {
            match value {
                Value::String(s) => dirs.push(s.clone()),
                Value::Array(items) => {
                    dirs.extend(items.iter().filter_map(Value::as_str).map(str::to_string))
                }
                _ => {}
            }
        }
        if dirs.is_empty() {
            dirs.push("src/".to_string());
        }
        dirs
    }
}

/// 通过 composer.json 加载的扩展（插件或 bundle）
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerExtension {
    pub root: PathBuf,
    /// 规范名称：插件类名末段或 bundle-name
    pub name: String,
    pub manifest: ComposerManifest,
}

impl ComposerExtension {
    /// 读取并校验 composer.json，`expected_type` 为 PLUGIN_TYPE 或 BUNDLE_TYPE
    pub fn load(root: &Path, expected_type: &str) -> AppResult<Self> {
        let manifest = read_composer_manifest(root)?;
        let path = root.join(COMPOSER_FILE);

        if manifest.kind != expected_type {
            return Err(AppError::ValidationError(format!(
                "{} 的 type 为 \"{}\"，期望 \"{}\"",
                path.display(),
                manifest.kind,
                expected_type
            )));
        }

        let name = if expected_type == PLUGIN_TYPE {
            let class = manifest.extra.plugin_class.as_deref().unwrap_or("").trim();
            if class.is_empty() {
                return Err(AppError::ValidationError(format!(
                    "{} 缺少 extra.plugin-class",
                    path.display()
                )));
            }
            class.rsplit('\\').next().unwrap_or(class).to_string()
        } else {
            let bundle = manifest.extra.bundle_name.as_deref().unwrap_or("").trim();
            if bundle.is_empty() {
                return Err(AppError::ValidationError(format!(
                    "{} 缺少 extra.bundle-name",
                    path.display()
                )));
            }
            bundle.to_string()
        };

        Ok(ComposerExtension {
            root: root.to_path_buf(),
            name,
            manifest,
        })
    }

    /// 第一个 psr-4 目录，即插件源码目录
    pub fn source_dir(&self) -> PathBuf {
        let first = self
            .manifest
            .source_dirs()
            .into_iter()
            .next()
            .unwrap_or_else(|| "src/".to_string());
        self.root.join(first.trim_end_matches('/'))
    }

    pub fn resources_dirs(&self) -> Vec<PathBuf> {
        self.manifest
            .source_dirs()
            .iter()
            .map(|dir| self.root.join(dir.trim_end_matches('/')).join("Resources"))
            .collect()
    }

    pub fn icon_path(&self) -> PathBuf {
        let relative = self
            .manifest
            .extra
            .plugin_icon
            .as_deref()
            .unwrap_or(DEFAULT_PLUGIN_ICON);
        self.source_dir().join(relative)
    }
}

/// 读取 composer.json 的结构化字段
pub fn read_composer_manifest(root: &Path) -> AppResult<ComposerManifest> {
    let path = root.join(COMPOSER_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| AppError::io("读取", &path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| AppError::ValidationError(format!("{} 格式错误：{}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_composer(dir: &Path, json: &str) {
        fs::write(dir.join(COMPOSER_FILE), json).unwrap();
    }

    #[test]
    fn test_plugin_name_from_class() {
        let dir = TempDir::new().unwrap();
        write_composer(
            dir.path(),
            r#"{"name":"acme/demo","type":"platform-plugin","version":"1.0.0","license":["MIT"],
                "require":{"platform/core":"~6.5.0"},
                "extra":{"plugin-class":"Acme\\Demo\\AcmeDemo"},
                "autoload":{"psr-4":{"Acme\\Demo\\":"src/"}}}"#,
        );
        let ext = ComposerExtension::load(dir.path(), PLUGIN_TYPE).unwrap();
        assert_eq!(ext.name, "AcmeDemo");
        assert_eq!(ext.manifest.license(), Some("MIT"));
        assert_eq!(ext.source_dir(), dir.path().join("src"));
        assert_eq!(ext.resources_dirs(), vec![dir.path().join("src").join("Resources")]);
        assert_eq!(
            ext.icon_path(),
            dir.path().join("src").join("Resources/config/plugin.png")
        );
    }

    #[test]
    fn test_bundle_name() {
        let dir = TempDir::new().unwrap();
        write_composer(
            dir.path(),
            r#"{"name":"acme/bundle","type":"platform-bundle","extra":{"bundle-name":"AcmeBundle"}}"#,
        );
        let ext = ComposerExtension::load(dir.path(), BUNDLE_TYPE).unwrap();
        assert_eq!(ext.name, "AcmeBundle");
        assert_eq!(ext.source_dir(), dir.path().join("src"));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let dir = TempDir::new().unwrap();
        write_composer(dir.path(), r#"{"name":"acme/lib","type":"library"}"#);
        assert!(matches!(
            ComposerExtension::load(dir.path(), PLUGIN_TYPE),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_plugin_class() {
        let dir = TempDir::new().unwrap();
        write_composer(dir.path(), r#"{"name":"acme/demo","type":"platform-plugin"}"#);
        assert!(ComposerExtension::load(dir.path(), PLUGIN_TYPE).is_err());
    }

    #[test]
    fn test_multiple_psr4_dirs() {
        let manifest: ComposerManifest = serde_json::from_str(
            r#"{"autoload":{"psr-4":{"A\\":["lib/","src/"],"B\\":"other/"}}}"#,
        )
        .unwrap();
        assert_eq!(manifest.source_dirs(), vec!["lib/", "src/", "other/"]);
    }
}
