// ============================================================================
// 打包流水线：把扩展源码变成可发布的 ZIP
// ✅ 只能做：在临时目录里依次执行 导出 → composer → 构建 → 图标 → 发布变换
//            → 路径过滤 → 校验清单 → 归档
// ⛔ 禁止：改动用户的源码目录（所有变换都发生在临时副本上）
// ============================================================================

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::ExtensionConfig;
use crate::extension::catalogue::lookup_min_matching_version;
use crate::extension::Extension;
use crate::models::dtos::{BuildConfigMap, PackResult};
use crate::services::archive::{copy_tree, create_zip_from_dir, extract_zip};
use crate::services::asset_builder::{build_assets, BuildAssetsOptions, BuildCollaborators};
use crate::services::checksum::write_checksum_manifest;
use crate::services::composer;
use crate::services::git;
use crate::services::release::{generate_changelog, resize_icon, strip_app_secret};
use crate::services::scanner::{build_config_entries, sources_for_extension, ScanOptions};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::to_slash;

// ============================================================================
// 过滤规则（固定列表 + 调用方显式传入的额外路径）
// ============================================================================

/// 相对扩展根目录、发布包中不应出现的开发文件
pub const DEFAULT_EXCLUDED_PATHS: &[&str] = &[
    ".git",
    ".github",
    ".gitlab-ci.yml",
    ".gitlab",
    ".idea",
    ".vscode",
    ".travis.yml",
    ".editorconfig",
    ".php-cs-fixer.dist.php",
    ".platform-extension.yml",
    ".platform-extension.yaml",
    "bitbucket-pipelines.yml",
    "ecs.php",
    "phpstan.neon",
    "phpstan.neon.dist",
    "phpstan-baseline.neon",
    "phpunit.xml",
    "phpunit.xml.dist",
    "psalm.xml",
    "rector.php",
    "tests",
    "Tests",
    "var",
];

/// 任意层级出现都会被删除的文件名
pub const DENIED_FILE_NAMES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    "__MACOSX",
    ".gitignore",
    ".gitattributes",
    ".gitkeep",
    ".eslintrc.js",
    ".eslintcache",
    ".stylelintrc",
    ".stylelintrc.js",
    ".stylelintcache",
    ".prettierrc",
    ".php_cs.cache",
    ".php-cs-fixer.cache",
    ".phpunit.result.cache",
];

/// 不允许出现在发布包中的归档格式
pub const DENIED_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "tgz", "rar", "7z", "phar"];

/// 任意层级出现都会被整体删除的目录名
const DENIED_DIR_NAMES: &[&str] = &["node_modules"];

/// 打包参数
#[derive(Debug, Clone, Default)]
pub struct PackOptions {
    /// ZIP 输出目录
    pub output_dir: PathBuf,
    /// 通过 git archive 导出源码；为 false 时直接复制目录
    pub use_git: bool,
    /// 导出的 git ref，为空时取最新 tag
    pub git_ref: Option<String>,
    /// 发布模式：生成变更日志、移除 App 密钥
    pub release: bool,
    /// 覆盖默认的输出文件名
    pub output_name: Option<String>,
    /// 跳过前端资源构建
    pub skip_build: bool,
}

/// `<name>-<tag>.zip`，tag 为空时为 `<name>.zip`
pub fn archive_file_name(name: &str, tag: &str) -> String {
    let tag = tag.trim().replace('/', "-");
    if tag.is_empty() {
        format!("{}.zip", name)
    } else {
        format!("{}-{}.zip", name, tag)
    }
}

fn is_denied_file(name: &str) -> bool {
    if DENIED_FILE_NAMES.contains(&name) {
        return true;
    }
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => DENIED_EXTENSIONS.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

/// 删除开发期文件
///
/// # 参数
/// - `root`: 扩展临时目录
/// - `extra_paths`: 配置中额外排除的相对路径
///
/// # 返回
/// 删除的条目数
pub fn remove_dev_paths(root: &Path, extra_paths: &[String]) -> AppResult<usize> {
    let mut removed = 0;

    let fixed = DEFAULT_EXCLUDED_PATHS.iter().map(|p| p.to_string());
    for relative in fixed.chain(extra_paths.iter().cloned()) {
        let relative = relative.trim_matches('/');
        if relative.is_empty() || relative.split('/').any(|part| part == "..") {
            continue;
        }
        let path = root.join(relative);
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else if path.exists() {
            std::fs::remove_file(&path)
        } else {
            continue;
        };
        result.map_err(|e| AppError::io("删除", &path, e))?;
        log::debug!("已排除 {}", relative);
        removed += 1;
    }

    let mut denied = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if DENIED_DIR_NAMES.contains(&name.as_ref()) {
                denied.push((entry.path().to_path_buf(), true));
                walker.skip_current_dir();
            }
            continue;
        }
        if is_denied_file(&name) {
            denied.push((entry.path().to_path_buf(), false));
        }
    }

    for (path, is_dir) in denied {
        let result = if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| AppError::io("删除", &path, e))?;
        log::debug!("已排除 {}", to_slash(path.strip_prefix(root).unwrap_or(&path)));
        removed += 1;
    }
    Ok(removed)
}

fn has_assets(entries: &BuildConfigMap) -> bool {
    entries.values().any(|e| {
        e.administration.entry_file_path.is_some() || e.storefront.entry_file_path.is_some()
    })
}

/// 打包扩展
///
/// 源码先被导出到临时目录，之后的所有变换都只作用于该副本；
/// 临时目录在任何退出路径上都会被删除。
///
/// # 参数
/// - `source_root`: 扩展源码根目录（git 模式下必须是仓库）
/// - `options`: 输出目录、git ref、发布模式等
/// - `collab`: 进程执行器、打包器、版本目录
///
/// # 返回
/// 生成的 ZIP 信息
pub fn pack_extension(
    ctx: &Context,
    source_root: &Path,
    options: &PackOptions,
    collab: &BuildCollaborators<'_>,
) -> AppResult<PackResult> {
    ctx.check()?;
    let source_extension = Extension::load(source_root)?;
    let name = source_extension.name().to_string();

    let tmp = tempfile::Builder::new()
        .prefix("platform-pack-")
        .tempdir()
        .map_err(|e| AppError::io("创建临时目录", &std::env::temp_dir(), e))?;
    let ext_dir = tmp.path().join(&name);

    // 1. 导出源码
    let tag = if options.use_git {
        let tag = match options.git_ref.as_deref().filter(|r| !r.trim().is_empty()) {
            Some(git_ref) => git_ref.to_string(),
            None => git::latest_tag(ctx, collab.runner, source_root)?,
        };
        let source_zip = tmp.path().join("source.zip");
        git::archive_ref(ctx, collab.runner, source_root, &tag, &source_zip)?;
        extract_zip(&source_zip, &ext_dir)?;
        std::fs::remove_file(&source_zip).map_err(|e| AppError::io("删除", &source_zip, e))?;
        tag
    } else {
        copy_tree(source_root, &ext_dir)?;
        String::new()
    };

    let extension = Extension::load(&ext_dir)?;
    let config = ExtensionConfig::load(&ext_dir)?;
    let compatibility = extension.compatibility()?;
    log::info!("打包 {}（{}）", extension.name(), extension.extension_type().as_str());

    // 2. composer 改写
    let is_composer_extension = !matches!(extension, Extension::App(_));
    if is_composer_extension && config.build.zip.composer.enabled {
        let version = lookup_min_matching_version(ctx, collab.catalogue, compatibility.as_ref())?;
        if composer::needs_rewrite(&version) {
            composer::install_with_rewritten_manifest(
                ctx,
                collab.runner,
                &ext_dir,
                &version,
                &config.build.zip.composer.excluded_packages,
            )?;
        }
    }

    // 3. 前端资源
    if config.build.zip.assets.enabled && !options.skip_build {
        let sources = sources_for_extension(&extension, &config)?;
        let entries = build_config_entries(&sources, &ScanOptions::default())?;
        if has_assets(&entries) {
            let build_options = BuildAssetsOptions {
                compatibility: compatibility.clone(),
                ..BuildAssetsOptions::default()
            };
            build_assets(ctx, &entries, &build_options, collab)?;
        } else {
            log::info!("{} 没有前端入口文件，跳过构建", extension.name());
        }
    }

    // 4. 图标
    if let Some(icon) = extension.icon_path() {
        resize_icon(&icon)?;
    }

    // 5. 发布变换
    if options.release {
        if config.changelog.enabled {
            let git_ref = if tag.is_empty() {
                git::latest_tag(ctx, collab.runner, source_root)?
            } else {
                tag.clone()
            };
            generate_changelog(
                ctx,
                collab.runner,
                source_root,
                &git_ref,
                extension.version_str(),
                &ext_dir,
                &config.changelog,
            )?;
        }
        if matches!(extension, Extension::App(_)) {
            strip_app_secret(&ext_dir)?;
        }
    }

    // 6. 路径过滤
    let removed = remove_dev_paths(&ext_dir, &config.build.zip.pack.excludes.paths)?;
    log::debug!("排除了 {} 个开发期条目", removed);

    // 7. 校验清单
    write_checksum_manifest(&ext_dir, extension.version_str(), &config.build.zip.checksum.ignore)?;

    // 8. 归档
    ctx.check()?;
    let file_name = options
        .output_name
        .clone()
        .unwrap_or_else(|| archive_file_name(&name, &tag));
    let zip_path = options.output_dir.join(file_name);
    let file_count = create_zip_from_dir(&ext_dir, &zip_path, Some(&name))?;
    log::info!("已生成 {}（{} 个文件）", zip_path.display(), file_count);

    Ok(PackResult {
        zip_path,
        extension_name: name,
        tag,
        file_count,
    })
}

// ============================================================================
// 单元测试
// ============================================================================
