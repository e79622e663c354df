// ============================================================================
// 扫描服务：发现项目中的扩展并生成构建配置
// 纯 Rust 函数，只读文件系统，方便单元测试
// ✅ 只能做：识别扩展、探测固定文件、生成 BuildConfigEntry
// ⛔ 禁止：安装依赖或启动构建
// ============================================================================

use std::path::{Path, PathBuf};

use crate::config::{ExtensionConfig, ProjectConfig};
use crate::extension::app::APP_MANIFEST_FILE;
use crate::extension::plugin::{read_composer_manifest, BUNDLE_TYPE, COMPOSER_FILE, PLUGIN_TYPE};
use crate::extension::{to_kebab_case, Extension};
use crate::models::dtos::{
    AdministrationTarget, BuildConfigEntry, BuildConfigMap, ScanFailure, Source, StorefrontTarget,
};
use crate::services::SCAN_IGNORED_DIRS;
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::canonical_dir;

/// 项目扫描的最大目录深度（custom/plugins/<Name> 与 vendor/<org>/<pkg> 都在 3 层以内）
const MAX_SCAN_DEPTH: usize = 4;

pub const ADMIN_SRC_DIR: &str = "Resources/app/administration/src";
pub const STOREFRONT_SRC_DIR: &str = "Resources/app/storefront/src";
pub const ADMIN_ENTRY_FILES: &[&str] = &[
    "Resources/app/administration/src/main.js",
    "Resources/app/administration/src/main.ts",
];
pub const STOREFRONT_ENTRY_FILES: &[&str] = &[
    "Resources/app/storefront/src/main.js",
    "Resources/app/storefront/src/main.ts",
];
pub const ADMIN_WEBPACK_FILES: &[&str] = &[
    "Resources/app/administration/build/webpack.config.js",
    "Resources/app/administration/build/webpack.config.cjs",
];
pub const STOREFRONT_WEBPACK_FILES: &[&str] = &[
    "Resources/app/storefront/build/webpack.config.js",
    "Resources/app/storefront/build/webpack.config.cjs",
];
pub const STOREFRONT_BASE_STYLE: &str = "Resources/app/storefront/src/scss/base.scss";
pub const DEFAULT_VIEWS_DIR: &str = "Resources/views";

/// 管理后台编译产物与 manifest（任意一个存在即视为已预构建）
pub const ADMIN_PUBLIC_DIR: &str = "Resources/public/administration";
pub const ADMIN_FAST_PATH_MANIFEST: &str = "Resources/public/administration/.vite/manifest.json";
pub const STOREFRONT_DIST_DIR: &str = "Resources/app/storefront/dist/storefront/js";

/// 生成 BuildConfigEntry 时的策略选项
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 已存在编译产物时清空入口文件
    pub skip_prebuilt: bool,
    /// 不受 skip_prebuilt 影响的扩展名
    pub force_build: Vec<String>,
    /// 完全跳过的扩展名
    pub exclude: Vec<String>,
}

impl ScanOptions {
    pub fn from_project_config(config: &ProjectConfig) -> Self {
        ScanOptions {
            skip_prebuilt: config.build.skip_prebuilt_assets,
            force_build: config.build.force_extension_build.clone(),
            exclude: config.build.exclude_extensions.clone(),
        }
    }
}

/// 项目扫描结果：成功的条目 + 单个扩展的失败记录
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub entries: BuildConfigMap,
    pub failures: Vec<ScanFailure>,
}

/// 扫描项目根目录，按路径排序的顺序产出构建配置
///
/// # 参数
/// - `root`: 项目根目录
/// - `config`: 项目配置（预构建跳过、强制构建、排除列表）
///
/// # 返回
/// 名称 → 构建配置的有序映射；单个扩展描述文件损坏时记录到 `failures` 并继续
pub fn scan_project(ctx: &Context, root: &Path, config: &ProjectConfig) -> AppResult<ScanReport> {
    if !root.is_dir() {
        return Err(AppError::ValidationError(format!(
            "项目目录不存在：{}",
            root.display()
        )));
    }

    let options = ScanOptions::from_project_config(config);
    let mut report = ScanReport::default();

    for dir in find_extension_dirs(root)? {
        ctx.check()?;

        let extension = match Extension::load(&dir) {
            Ok(ext) => ext,
            Err(e) => {
                log::warn!("跳过扩展 {}：{}", dir.display(), e);
                report.failures.push(ScanFailure {
                    path: dir,
                    message: e.to_string(),
                });
                continue;
            }
        };

        if options.exclude.iter().any(|n| n == extension.name()) {
            log::info!("扩展 {} 在排除列表中，跳过", extension.name());
            continue;
        }

        let result = ExtensionConfig::load(extension.root_dir())
            .and_then(|ext_config| sources_for_extension(&extension, &ext_config))
            .and_then(|sources| build_config_entries(&sources, &options));

        match result {
            Ok(entries) => {
                for (name, entry) in entries {
                    if report.entries.contains_key(&name) {
                        log::warn!("重复的构建条目 {}，保留先发现的 {}", name, dir.display());
                        continue;
                    }
                    report.entries.insert(name, entry);
                }
            }
            Err(e) => {
                log::warn!("扩展 {} 扫描失败：{}", extension.name(), e);
                report.failures.push(ScanFailure {
                    path: dir,
                    message: e.to_string(),
                });
            }
        }
    }

    log::info!(
        "扫描完成：{} 个构建条目，{} 个失败",
        report.entries.len(),
        report.failures.len()
    );
    Ok(report)
}

/// 按文件名排序遍历，找出包含扩展描述文件的目录；找到后不再深入
fn find_extension_dirs(root: &Path) -> AppResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut walker = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_SCAN_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.file_type().is_dir()
                && e.file_name()
                    .to_str()
                    .map(|name| !SCAN_IGNORED_DIRS.contains(&name))
                    .unwrap_or(false)
        });

    while let Some(entry) = walker.next() {
        let entry = entry.map_err(|e| AppError::ScanError(format!("遍历项目目录失败：{}", e)))?;
        let dir = entry.path();
        if is_extension_dir(dir) {
            found.push(dir.to_path_buf());
            walker.skip_current_dir();
        }
    }

    Ok(found)
}

/// manifest.xml 或带扩展 type 的 composer.json；无法解析的 composer.json 也算候选，交给加载阶段报错
fn is_extension_dir(dir: &Path) -> bool {
    if dir.join(APP_MANIFEST_FILE).is_file() {
        return true;
    }
    if !dir.join(COMPOSER_FILE).is_file() {
        return false;
    }
    match read_composer_manifest(dir) {
        Ok(manifest) => manifest.kind == PLUGIN_TYPE || manifest.kind == BUNDLE_TYPE,
        Err(_) => true,
    }
}

/// 扩展展开为可构建单元：主 Source + 每个 extra bundle 一个
pub fn sources_for_extension(
    extension: &Extension,
    config: &ExtensionConfig,
) -> AppResult<Vec<Source>> {
    let assets = &config.build.zip.assets;
    let make = |name: String, path: PathBuf| Source {
        name,
        path,
        admin_fast_build: assets.enable_esbuild_for_admin,
        storefront_fast_build: assets.enable_esbuild_for_storefront,
        disable_css_preprocessor: assets.disable_sass,
        strict_production_install: assets.npm_strict,
    };

    let source_dir = extension.source_dir();
    let mut sources = vec![make(extension.name().to_string(), source_dir.clone())];

    for bundle in &config.build.extra_bundles {
        let path = source_dir.join(&bundle.path);
        if !path.is_dir() {
            log::warn!(
                "扩展 {} 的 extra bundle 目录不存在，跳过：{}",
                extension.name(),
                path.display()
            );
            continue;
        }
        let name = match bundle.name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => name.to_string(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    AppError::ConfigError(format!("无法从 {} 推断 bundle 名称", bundle.path))
                })?,
        };
        sources.push(make(name, path));
    }

    Ok(sources)
}

/// 为一组 Source 生成构建配置映射
pub fn build_config_entries(sources: &[Source], options: &ScanOptions) -> AppResult<BuildConfigMap> {
    let mut entries = BuildConfigMap::new();
    for source in sources {
        let entry = build_config_entry(source, options)?;
        entries.insert(source.name.clone(), entry);
    }
    Ok(entries)
}

/// 探测固定文件生成单个构建配置；文件存在是唯一依据
pub fn build_config_entry(source: &Source, options: &ScanOptions) -> AppResult<BuildConfigEntry> {
    let base = &source.path;
    let technical_name = to_kebab_case(&source.name);

    let mut admin_entry = first_existing(base, ADMIN_ENTRY_FILES);
    let mut storefront_entry = first_existing(base, STOREFRONT_ENTRY_FILES);

    let forced = options.force_build.iter().any(|n| n == &source.name);
    if options.skip_prebuilt && !forced {
        if admin_entry.is_some() && has_prebuilt_admin(base, &technical_name) {
            log::info!("{} 已存在管理后台产物，跳过构建", source.name);
            admin_entry = None;
        }
        if storefront_entry.is_some() && has_prebuilt_storefront(base, &technical_name) {
            log::info!("{} 已存在店面产物，跳过构建", source.name);
            storefront_entry = None;
        }
    }

    let style_files = if base.join(STOREFRONT_BASE_STYLE).is_file() {
        vec![STOREFRONT_BASE_STYLE.to_string()]
    } else {
        Vec::new()
    };

    Ok(BuildConfigEntry {
        base_path: canonical_dir(base)?,
        views: vec![DEFAULT_VIEWS_DIR.to_string()],
        technical_name,
        administration: AdministrationTarget {
            path: ADMIN_SRC_DIR.to_string(),
            entry_file_path: admin_entry,
            webpack: first_existing(base, ADMIN_WEBPACK_FILES),
        },
        storefront: StorefrontTarget {
            path: STOREFRONT_SRC_DIR.to_string(),
            entry_file_path: storefront_entry,
            webpack: first_existing(base, STOREFRONT_WEBPACK_FILES),
            style_files,
        },
        fast_build_for_admin: source.admin_fast_build,
        fast_build_for_storefront: source.storefront_fast_build,
        disable_css_preprocessor: source.disable_css_preprocessor,
        strict_production_install: source.strict_production_install,
    })
}

pub(crate) fn first_existing(base: &Path, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|rel| base.join(rel).is_file())
        .map(|rel| rel.to_string())
}

/// 编译后的 JS 或 manifest 任意一个存在即可
fn has_prebuilt_admin(base: &Path, technical_name: &str) -> bool {
    base.join(ADMIN_PUBLIC_DIR)
        .join("js")
        .join(format!("{}.js", technical_name))
        .is_file()
        || base.join(ADMIN_FAST_PATH_MANIFEST).is_file()
}

/// 嵌套布局与平铺布局都要检查
fn has_prebuilt_storefront(base: &Path, technical_name: &str) -> bool {
    let dist = base.join(STOREFRONT_DIST_DIR);
    dist.join(technical_name)
        .join(format!("{}.js", technical_name))
        .is_file()
        || dist.join(format!("{}.js", technical_name)).is_file()
}


#[cfg(test)]
mod tests {
    use super::fixtures::{plugin, touch};
    use super::*;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_detects_entry_files() {
        let dir = TempDir::new().unwrap();
        let p = plugin(dir.path(), "AcmeDemo");
        touch(&p, "Resources/app/administration/src/main.ts");
        touch(&p, "Resources/app/storefront/src/main.js");
        touch(&p, "Resources/app/storefront/build/webpack.config.cjs");
        touch(&p, "Resources/app/storefront/src/scss/base.scss");

        let report = scan_project(&Context::new(), dir.path(), &ProjectConfig::default()).unwrap();
        assert!(report.failures.is_empty());
        let entry = &report.entries["AcmeDemo"];
        assert_eq!(entry.technical_name, "acme-demo");
        assert!(entry.base_path.ends_with(std::path::MAIN_SEPARATOR));
        assert!(entry.base_path.contains("src"));
        assert_eq!(
            entry.administration.entry_file_path.as_deref(),
            Some("Resources/app/administration/src/main.ts")
        );
        assert!(entry.administration.webpack.is_none());
        assert_eq!(
            entry.storefront.webpack.as_deref(),
            Some("Resources/app/storefront/build/webpack.config.cjs")
        );
        assert_eq!(entry.storefront.style_files, vec![STOREFRONT_BASE_STYLE]);
        assert_eq!(entry.views, vec!["Resources/views"]);
    }

    #[test]
    fn test_scan_collects_failures_and_continues() {
        let dir = TempDir::new().unwrap();
        plugin(dir.path(), "Good");
        let broken = dir.path().join("custom").join("plugins").join("Broken");
        fs::create_dir_all(&broken).unwrap();
        fs::write(broken.join("composer.json"), "{not json").unwrap();

        let report = scan_project(&Context::new(), dir.path(), &ProjectConfig::default()).unwrap();
        assert!(report.entries.contains_key("Good"));
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("Broken"));
    }

    #[test]
    fn test_scan_ignores_non_extension_packages_and_node_modules() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("composer.json"), r#"{"type":"project"}"#).unwrap();
        let lib = dir.path().join("vendor").join("acme").join("lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("composer.json"), r#"{"type":"library"}"#).unwrap();
        let nm = dir.path().join("node_modules").join("x");
        fs::create_dir_all(&nm).unwrap();
        fs::write(nm.join("manifest.xml"), "<manifest/>").unwrap();

        let report = scan_project(&Context::new(), dir.path(), &ProjectConfig::default()).unwrap();
        assert!(report.entries.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_extra_bundles_fan_out() {
        let dir = TempDir::new().unwrap();
        let p = plugin(dir.path(), "AcmeDemo");
        fs::create_dir_all(p.join("src").join("Storefront").join("ThemeBundle")).unwrap();
        fs::write(
            p.join(".platform-extension.yml"),
            "build:\n  extra_bundles:\n    - path: Storefront/ThemeBundle\n    - name: Named\n      path: Storefront/ThemeBundle\n    - path: Missing\n",
        )
        .unwrap();

        let report = scan_project(&Context::new(), dir.path(), &ProjectConfig::default()).unwrap();
        let keys: Vec<&String> = report.entries.keys().collect();
        assert_eq!(keys, vec!["AcmeDemo", "ThemeBundle", "Named"]);
        assert_eq!(report.entries["ThemeBundle"].technical_name, "theme-bundle");
    }

    #[test]
    fn test_skip_prebuilt_admin_by_manifest_or_js() {
        let dir = TempDir::new().unwrap();
        let a = plugin(dir.path(), "WithJs");
        touch(&a, "Resources/app/administration/src/main.js");
        touch(&a, "Resources/public/administration/js/with-js.js");
        let b = plugin(dir.path(), "WithManifest");
        touch(&b, "Resources/app/administration/src/main.js");
        touch(&b, "Resources/public/administration/.vite/manifest.json");
        let c = plugin(dir.path(), "Forced");
        touch(&c, "Resources/app/administration/src/main.js");
        touch(&c, "Resources/public/administration/js/forced.js");
        let d = plugin(dir.path(), "Flat");
        touch(&d, "Resources/app/storefront/src/main.js");
        touch(&d, "Resources/app/storefront/dist/storefront/js/flat.js");

        let mut config = ProjectConfig::default();
        config.build.skip_prebuilt_assets = true;
        config.build.force_extension_build = vec!["Forced".into()];

        let report = scan_project(&Context::new(), dir.path(), &config).unwrap();
        assert!(report.entries["WithJs"].administration.entry_file_path.is_none());
        assert!(report.entries["WithManifest"].administration.entry_file_path.is_none());
        assert!(report.entries["Forced"].administration.entry_file_path.is_some());
        assert!(report.entries["Flat"].storefront.entry_file_path.is_none());
    }

    #[test]
    fn test_exclude_extensions() {
        let dir = TempDir::new().unwrap();
        plugin(dir.path(), "Keep");
        plugin(dir.path(), "Drop");
        let mut config = ProjectConfig::default();
        config.build.exclude_extensions = vec!["Drop".into()];
        let report = scan_project(&Context::new(), dir.path(), &config).unwrap();
        assert_eq!(report.entries.keys().collect::<Vec<_>>(), vec!["Keep"]);
    }

    #[test]
    fn test_missing_root_is_validation_error() {
        let dir = TempDir::new().unwrap();
        let err = scan_project(&Context::new(), &dir.path().join("nope"), &ProjectConfig::default())
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn test_scan_honours_cancellation() {
        let dir = TempDir::new().unwrap();
        plugin(dir.path(), "A");
        let ctx = Context::new();
        ctx.cancel();
        assert!(matches!(
            scan_project(&ctx, dir.path(), &ProjectConfig::default()),
            Err(AppError::Cancelled)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// 同一棵目录树扫描两次得到相同的有序映射
        #[test]
        fn prop_scan_is_idempotent(
            names in proptest::collection::btree_set("[A-Z][a-z]{2,6}", 1..5),
            with_admin in proptest::collection::vec(any::<bool>(), 5),
        ) {
            let dir = TempDir::new().unwrap();
            for (i, name) in names.iter().enumerate() {
                let p = plugin(dir.path(), name);
                if with_admin[i] {
                    touch(&p, "Resources/app/administration/src/main.js");
                }
            }
            let config = ProjectConfig::default();
            let first = scan_project(&Context::new(), dir.path(), &config).unwrap();
            let second = scan_project(&Context::new(), dir.path(), &config).unwrap();
            prop_assert_eq!(&first, &second);
            let keys: Vec<String> = first.entries.keys().cloned().collect();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }
}
