// ============================================================================
// 资源构建编排：fast path（进程内打包器）与 slow path（平台工具链）
// ============================================================================
//
// 每个构建条目按目标（administration / storefront）分别决定走哪条路径：
// 入口文件存在且 fast build 开启 → 打包器；入口文件存在但未开启 → 平台工作区构建。
// 所有临时目录与 node_modules 通过 scopeguard / TempDir 在任何退出路径上清理。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::extension::catalogue::{
    dev_version, lookup_min_matching_version, uses_nested_storefront_layout, VersionCatalogue,
    CORE_PACKAGE,
};
use crate::extension::version::{Constraint, Version};
use crate::models::dtos::{
    AdministrationTarget, AssetTarget, BuildConfigEntry, BuildConfigMap, StorefrontTarget,
};
use crate::services::bundler::{AssetBundler, BundlerOptions};
use crate::services::installer::install_node_modules;
use crate::services::scanner::{
    first_existing, ADMIN_SRC_DIR, DEFAULT_VIEWS_DIR, STOREFRONT_BASE_STYLE, STOREFRONT_ENTRY_FILES,
    STOREFRONT_SRC_DIR,
};
use crate::services::workspace::{
    clone_workspace, platform_path, prepare_administration, prepare_storefront, write_state_files,
    ADMIN_APP_DIR, STOREFRONT_APP_DIR,
};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::{canonical_dir, remove_paths};
use crate::utils::process::{CommandSpec, ProcessRunner};

/// slow path storefront 构建时注入的伪条目名
pub const STOREFRONT_PSEUDO_ENTRY: &str = "Storefront";

/// 构建参数
#[derive(Debug, Clone, Default)]
pub struct BuildAssetsOptions {
    /// 已有的平台目录（项目根目录或平台源码），为空时临时克隆
    pub workspace_root: Option<PathBuf>,
    /// 扩展的平台兼容性约束，决定最低匹配版本
    pub compatibility: Option<Constraint>,
    pub browserslist: Option<String>,
    /// 构建结束后保留 node_modules 的条目名
    pub keep_node_modules: Vec<String>,
    pub source_maps: bool,
    /// 已存在 node_modules 时也重新安装
    pub force_install: bool,
}

/// 构建所需的外部协作者
pub struct BuildCollaborators<'a> {
    pub runner: &'a dyn ProcessRunner,
    pub bundler: &'a dyn AssetBundler,
    pub catalogue: &'a dyn VersionCatalogue,
}

/// 构建结果摘要
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSummary {
    pub fast: Vec<(String, AssetTarget)>,
    pub slow_admin: Vec<String>,
    pub slow_storefront: Vec<String>,
    /// 计算出的最低匹配版本（未查询时为空）
    pub platform_version: Option<Version>,
}

fn needs_slow(entry: &BuildConfigEntry, target: AssetTarget) -> bool {
    match target {
        AssetTarget::Administration => {
            entry.administration.entry_file_path.is_some() && !entry.fast_build_for_admin
        }
        AssetTarget::Storefront => {
            entry.storefront.entry_file_path.is_some() && !entry.fast_build_for_storefront
        }
    }
}

fn needs_fast(entry: &BuildConfigEntry, target: AssetTarget) -> bool {
    match target {
        AssetTarget::Administration => {
            entry.administration.entry_file_path.is_some() && entry.fast_build_for_admin
        }
        AssetTarget::Storefront => {
            entry.storefront.entry_file_path.is_some() && entry.fast_build_for_storefront
        }
    }
}

/// 任一条目的某个目标有入口文件但未开启 fast build
pub fn requires_slow_path(entries: &BuildConfigMap) -> bool {
    entries.values().any(|e| {
        needs_slow(e, AssetTarget::Administration) || needs_slow(e, AssetTarget::Storefront)
    })
}

fn slow_entries(entries: &BuildConfigMap, target: AssetTarget) -> Vec<String> {
    entries
        .iter()
        .filter(|(_, e)| needs_slow(e, target))
        .map(|(name, _)| name.clone())
        .collect()
}

/// 构建一组条目的前端资源
///
/// # 参数
/// - `entries`: 扫描得到的构建配置
/// - `options`: 工作区、兼容性约束、浏览器目标等
/// - `collab`: 进程执行器、打包器、版本目录
///
/// # 返回
/// fast / slow 两条路径各自构建了哪些条目
pub fn build_assets(
    ctx: &Context,
    entries: &BuildConfigMap,
    options: &BuildAssetsOptions,
    collab: &BuildCollaborators<'_>,
) -> AppResult<BuildSummary> {
    let mut summary = BuildSummary::default();
    if entries.is_empty() {
        log::info!("没有需要构建的条目");
        return Ok(summary);
    }
    ctx.check()?;

    let slow = requires_slow_path(entries);
    let fast_storefront = entries
        .values()
        .any(|e| needs_fast(e, AssetTarget::Storefront));

    // 版本只影响 slow path 与 storefront 输出布局
    let version = if slow || fast_storefront {
        match lookup_min_matching_version(ctx, collab.catalogue, options.compatibility.as_ref()) {
            Ok(v) => Some(v),
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) if slow => return Err(e),
            Err(e) => {
                log::warn!("获取平台版本目录失败，按开发版本布局输出：{}", e);
                Some(dev_version())
            }
        }
    } else {
        None
    };
    let new_layout = version.as_ref().map(uses_nested_storefront_layout).unwrap_or(true);
    summary.platform_version = version.clone();

    // 结束时删除本次安装的 node_modules（保留列表除外）
    let mut cleanup = scopeguard::guard(Vec::<PathBuf>::new(), |dirs| remove_paths(&dirs));

    let installed = install_node_modules(ctx, entries, options.force_install, collab.runner)?;
    cleanup.extend(removable_node_modules(installed, entries, &options.keep_node_modules));

    // ---------------- fast path ----------------
    for (name, entry) in entries {
        for target in [AssetTarget::Administration, AssetTarget::Storefront] {
            if !needs_fast(entry, target) {
                continue;
            }
            ctx.check()?;
            let bundler_options = BundlerOptions::for_entry(name, entry, target, new_layout);
            let result = collab.bundler.compile_extension_asset(ctx, &bundler_options)?;
            if target == AssetTarget::Administration {
                collab
                    .bundler
                    .dump_fast_path_manifest(ctx, &bundler_options, &result)?;
            }
            summary.fast.push((name.clone(), target));
        }
    }

    // ---------------- slow path ----------------
    if !slow {
        log::info!("所有条目都可以走 fast path，跳过平台工作区");
        return Ok(summary);
    }

    let admin_names = slow_entries(entries, AssetTarget::Administration);
    let storefront_names = slow_entries(entries, AssetTarget::Storefront);

    // 临时克隆的工作区随 TempDir 一起释放
    let mut _ephemeral = None;
    let workspace = match &options.workspace_root {
        Some(root) => root.clone(),
        None => {
            let dir = tempfile::Builder::new()
                .prefix("platform-workspace-")
                .tempdir()
                .map_err(|e| AppError::BuildError(format!("无法创建临时工作区：{}", e)))?;
            let version = version.clone().unwrap_or_else(dev_version);
            clone_workspace(ctx, collab.runner, &version, dir.path())?;
            let path = dir.path().to_path_buf();
            _ephemeral = Some(dir);
            path
        }
    };

    let mut state_entries = BuildConfigMap::new();
    for (name, entry) in entries {
        if admin_names.contains(name) || storefront_names.contains(name) {
            state_entries.insert(name.clone(), entry.clone());
        }
    }
    if !storefront_names.is_empty() {
        state_entries.insert(
            STOREFRONT_PSEUDO_ENTRY.to_string(),
            storefront_pseudo_entry(&workspace)?,
        );
    }
    write_state_files(&workspace, &state_entries)?;

    let keep_workspace_modules = |component: &str| {
        options.keep_node_modules.iter().any(|n| n == component)
    };

    if admin_names.is_empty() {
        log::info!("没有需要平台工具链构建的管理后台条目");
    } else {
        let admin_root = platform_path(&workspace, "Administration", ADMIN_APP_DIR);
        let installed = prepare_administration(ctx, collab.runner, &admin_root)?;
        if !keep_workspace_modules("Administration") {
            cleanup.extend(installed);
        }

        let mut spec = CommandSpec::new("npm")
            .args(["run", "build"])
            .cwd(&admin_root)
            .env("PROJECT_ROOT", workspace.to_string_lossy())
            .env(
                "ADMIN_ROOT",
                platform_path(&workspace, "Administration", "").to_string_lossy(),
            )
            .env("PLATFORM_ADMIN_BUILD_ONLY_EXTENSIONS", "1");
        if !options.source_maps {
            spec = spec.env("PLATFORM_ADMIN_SKIP_SOURCEMAP_GENERATION", "1");
        }
        if let Some(browserslist) = &options.browserslist {
            spec = spec.env("BROWSERSLIST", browserslist.as_str());
        }
        log::info!("使用平台工具链构建管理后台：{}", admin_names.join(", "));
        collab.runner.run(ctx, &spec)?;
        summary.slow_admin = admin_names;
    }

    if storefront_names.is_empty() {
        log::info!("没有需要平台工具链构建的店面条目");
    } else {
        let storefront_root = platform_path(&workspace, "Storefront", STOREFRONT_APP_DIR);
        let installed = prepare_storefront(ctx, collab.runner, &storefront_root)?;
        if !keep_workspace_modules(STOREFRONT_PSEUDO_ENTRY) {
            cleanup.extend(installed);
        }

        let mut spec = CommandSpec::new("npm")
            .args(["run", "production"])
            .cwd(&storefront_root)
            .env("PROJECT_ROOT", workspace.to_string_lossy())
            .env(
                "STOREFRONT_ROOT",
                storefront_root.to_string_lossy(),
            )
            .env("NODE_ENV", "production");
        if let Some(browserslist) = &options.browserslist {
            spec = spec.env("BROWSERSLIST", browserslist.as_str());
        }
        log::info!("使用平台工具链构建店面：{}", storefront_names.join(", "));
        collab.runner.run(ctx, &spec)?;
        summary.slow_storefront = storefront_names;
    }

    Ok(summary)
}

/// 过滤掉保留条目相关的 node_modules（目录属于条目本身、其祖先或其子目录）
fn removable_node_modules(
    installed: Vec<PathBuf>,
    entries: &BuildConfigMap,
    keep: &[String],
) -> Vec<PathBuf> {
    let kept_bases: Vec<PathBuf> = keep
        .iter()
        .filter_map(|name| entries.get(name))
        .map(|e| PathBuf::from(&e.base_path))
        .collect();

    installed
        .into_iter()
        .filter(|dir| {
            let owner = dir.parent().unwrap_or(dir);
            !kept_bases
                .iter()
                .any(|base| base.starts_with(owner) || owner.starts_with(base))
        })
        .collect()
}

/// 平台自身的 storefront 作为一个插件参与构建
fn storefront_pseudo_entry(workspace: &Path) -> AppResult<BuildConfigEntry> {
    let bundle_root = platform_path(workspace, "Storefront", "");
    let base_path = if bundle_root.is_dir() {
        canonical_dir(&bundle_root)?
    } else {
        let mut s = bundle_root.to_string_lossy().to_string();
        if !s.ends_with(std::path::MAIN_SEPARATOR) {
            s.push(std::path::MAIN_SEPARATOR);
        }
        s
    };

    let entry_file_path = first_existing(&bundle_root, STOREFRONT_ENTRY_FILES);

    Ok(BuildConfigEntry {
        base_path,
        views: vec![DEFAULT_VIEWS_DIR.to_string()],
        technical_name: "storefront".to_string(),
        administration: AdministrationTarget {
            path: ADMIN_SRC_DIR.to_string(),
            entry_file_path: None,
            webpack: None,
        },
        storefront: StorefrontTarget {
            path: STOREFRONT_SRC_DIR.to_string(),
            entry_file_path,
            webpack: None,
            style_files: vec![STOREFRONT_BASE_STYLE.to_string()],
        },
        fast_build_for_admin: false,
        fast_build_for_storefront: false,
        disable_css_preprocessor: false,
        strict_production_install: false,
    })
}

#[derive(Deserialize)]
struct ComposerLock {
    #[serde(default)]
    packages: Vec<LockedPackage>,
}

#[derive(Deserialize)]
struct LockedPackage {
    name: String,
    version: String,
}

/// 从项目 composer.lock 读取已安装的平台版本，作为精确约束
pub fn constraint_from_composer_lock(project_root: &Path) -> AppResult<Option<Constraint>> {
    let path = project_root.join("composer.lock");
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| AppError::io("读取", &path, e))?;
    let lock: ComposerLock = serde_json::from_str(&content)
        .map_err(|e| AppError::ConfigError(format!("{} 格式错误：{}", path.display(), e)))?;

    match lock.packages.iter().find(|p| p.name == CORE_PACKAGE) {
        Some(pkg) => {
            let version = Version::parse(&pkg.version)?;
            Constraint::parse(&format!("={}", version)).map(Some)
        }
        None => Ok(None),
    }
}
