// ============================================================================
// 扩展模型：App / PlatformPlugin / Bundle 三种形态
// ✅ 只能做：读取扩展描述文件、对外提供统一的只读能力集
// ⛔ 禁止：构建、打包等副作用（交给 services 层）
// ============================================================================

pub mod app;
pub mod catalogue;
pub mod changelog;
pub mod plugin;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;

use crate::extension::app::{AppExtension, APP_MANIFEST_FILE, DEFAULT_APP_COMPATIBILITY};
use crate::extension::catalogue::CORE_PACKAGE;
use crate::extension::changelog::ExtensionChangelog;
use crate::extension::plugin::{
    read_composer_manifest, ComposerExtension, BUNDLE_TYPE, COMPOSER_FILE, PLUGIN_TYPE,
};
use crate::extension::version::{Constraint, Version};
use crate::utils::error::{AppError, AppResult};

/// 扩展类型标签
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionType {
    App,
    PlatformPlugin,
    Bundle,
}

impl ExtensionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionType::App => "app",
            ExtensionType::PlatformPlugin => PLUGIN_TYPE,
            ExtensionType::Bundle => BUNDLE_TYPE,
        }
    }
}

/// 多语言的展示信息
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ExtensionMetadata {
    pub label: IndexMap<String, String>,
    pub description: IndexMap<String, String>,
}

/// 已加载的扩展，加载后不可变
#[derive(Debug, Clone, PartialEq)]
pub enum Extension {
    App(AppExtension),
    PlatformPlugin(ComposerExtension),
    Bundle(ComposerExtension),
}

impl Extension {
    /// 按描述文件识别扩展形态：manifest.xml 优先，其次 composer.json 的 type
    pub fn load(root: &Path) -> AppResult<Self> {
        if !root.is_dir() {
            return Err(AppError::ValidationError(format!(
                "扩展目录不存在：{}",
                root.display()
            )));
        }

        if root.join(APP_MANIFEST_FILE).is_file() {
            return AppExtension::load(root).map(Extension::App);
        }

        if root.join(COMPOSER_FILE).is_file() {
            let manifest = read_composer_manifest(root)?;
            return match manifest.kind.as_str() {
                PLUGIN_TYPE => ComposerExtension::load(root, PLUGIN_TYPE).map(Extension::PlatformPlugin),
                BUNDLE_TYPE => ComposerExtension::load(root, BUNDLE_TYPE).map(Extension::Bundle),
                other => Err(AppError::ValidationError(format!(
                    "{} 不是扩展（type = \"{}\"）",
                    root.display(),
                    other
                ))),
            };
        }

        Err(AppError::ValidationError(format!(
            "{} 下既没有 {} 也没有 {}",
            root.display(),
            APP_MANIFEST_FILE,
            COMPOSER_FILE
        )))
    }

    pub fn extension_type(&self) -> ExtensionType {
        match self {
            Extension::App(_) => ExtensionType::App,
            Extension::PlatformPlugin(_) => ExtensionType::PlatformPlugin,
            Extension::Bundle(_) => ExtensionType::Bundle,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Extension::App(app) => &app.manifest.name,
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => &ext.name,
        }
    }

    /// kebab-case 的技术名，用于产物文件名
    pub fn technical_name(&self) -> String {
        to_kebab_case(self.name())
    }

    pub fn root_dir(&self) -> &Path {
        match self {
            Extension::App(app) => &app.root,
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => &ext.root,
        }
    }

    /// 含 Resources/ 的源码目录：App 为根目录，插件为第一个 psr-4 目录
    pub fn source_dir(&self) -> PathBuf {
        match self {
            Extension::App(app) => app.root.clone(),
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => ext.source_dir(),
        }
    }

    pub fn resources_dirs(&self) -> Vec<PathBuf> {
        match self {
            Extension::App(app) => vec![app.root.join("Resources")],
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => ext.resources_dirs(),
        }
    }

    /// 原始版本字符串（未声明时为空）
    pub fn version_str(&self) -> &str {
        match self {
            Extension::App(app) => &app.manifest.version,
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => {
                ext.manifest.version.as_deref().unwrap_or("")
            }
        }
    }

    pub fn version(&self) -> AppResult<Version> {
        let raw = self.version_str();
        if raw.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "扩展 {} 没有声明版本号",
                self.name()
            )));
        }
        Version::parse(raw)
    }

    pub fn license(&self) -> &str {
        match self {
            Extension::App(app) => &app.manifest.license,
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => {
                ext.manifest.license().unwrap_or("")
            }
        }
    }

    /// 平台兼容性约束；插件/bundle 取 require 中的核心包，未声明时返回 None
    pub fn compatibility(&self) -> AppResult<Option<Constraint>> {
        match self {
            Extension::App(app) => {
                let raw = app
                    .manifest
                    .compatibility
                    .as_deref()
                    .unwrap_or(DEFAULT_APP_COMPATIBILITY);
                Constraint::parse(raw).map(Some)
            }
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => {
                match ext.manifest.require.get(CORE_PACKAGE) {
                    Some(raw) => Constraint::parse(raw).map(Some),
                    None => Ok(None),
                }
            }
        }
    }

    pub fn changelog(&self) -> AppResult<Option<ExtensionChangelog>> {
        ExtensionChangelog::load(self.root_dir())
    }

    /// 图标路径（不保证文件存在）
    pub fn icon_path(&self) -> Option<PathBuf> {
        match self {
            Extension::App(app) => app.manifest.icon.as_ref().map(|icon| app.root.join(icon)),
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => Some(ext.icon_path()),
        }
    }

    pub fn metadata(&self) -> ExtensionMetadata {
        match self {
            Extension::App(app) => ExtensionMetadata {
                label: app.manifest.label.clone(),
                description: app.manifest.description.clone(),
            },
            Extension::PlatformPlugin(ext) | Extension::Bundle(ext) => ExtensionMetadata {
                label: ext.manifest.extra.label.clone(),
                description: ext.manifest.extra.description.clone(),
            },
        }
    }
}

static WORD_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
static CAMEL_HUMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());

/// 驼峰名转 kebab-case：SwagPayPal → swag-pay-pal，Foo_Bar → foo-bar
pub fn to_kebab_case(name: &str) -> String {
    let step = WORD_START_RE.replace_all(name, "${1}-${2}");
    let step = CAMEL_HUMP_RE.replace_all(&step, "${1}-${2}");
    step.replace('_', "-").replace("--", "-").to_lowercase()
}
