// ============================================================================
// 发布前的内容变换：变更日志生成、App 密钥剔除、图标缩放
// ✅ 只能做：在打包临时目录内改写文件
// ⛔ 禁止：修改用户源码目录
// ============================================================================

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use regex::Regex;

use crate::config::ChangelogConfig;
use crate::extension::app::{parse_manifest, strip_setup_secret, APP_MANIFEST_FILE};
use crate::extension::changelog::{parse_changelog, CHANGELOG_FILES};
use crate::services::git::{commits_between, previous_tag, Commit};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::write_file;
use crate::utils::process::ProcessRunner;

/// 图标允许的最大边长
pub const ICON_MAX_SIZE: u32 = 256;

/// 未配置模板时每条提交的渲染方式
pub const DEFAULT_CHANGELOG_TEMPLATE: &str = "- {{ message }}";

/// 按配置的过滤正则与模板渲染提交列表
pub fn render_changelog(commits: &[Commit], config: &ChangelogConfig) -> AppResult<Vec<String>> {
    let filter = match config.pattern.as_deref().filter(|p| !p.is_empty()) {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
            AppError::ConfigError(format!("changelog.pattern 不是合法的正则：{}", e))
        })?),
        None => None,
    };
    let template = config
        .template
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CHANGELOG_TEMPLATE);

    Ok(commits
        .iter()
        .filter(|c| filter.as_ref().map_or(true, |re| re.is_match(&c.message)))
        .map(|c| {
            template
                .replace("{{ message }}", &c.message)
                .replace("{{ hash }}", &c.hash)
        })
        .collect())
}

/// 将某个版本的条目写到规范变更日志文件的最前面
///
/// 文件中已经有该版本时保持不变。
pub fn prepend_changelog_section(root: &Path, version: &str, lines: &[String]) -> AppResult<PathBuf> {
    let path = root.join(CHANGELOG_FILES[0]);
    let existing = if path.is_file() {
        std::fs::read_to_string(&path).map_err(|e| AppError::io("读取变更日志", &path, e))?
    } else {
        String::new()
    };

    if parse_changelog(&existing).versions.contains_key(version) {
        log::info!("变更日志已包含版本 {}，不再生成", version);
        return Ok(path);
    }

    let mut content = format!("# {}\n\n", version);
    for line in lines {
        content.push_str(line);
        content.push('\n');
    }
    if !existing.is_empty() {
        content.push('\n');
        content.push_str(&existing);
    }
    write_file(&path, content)?;
    Ok(path)
}

/// 根据 git 历史生成当前版本的变更日志
///
/// # 参数
/// - `repo`: 带 .git 的源码目录
/// - `git_ref`: 当前发布的 tag
/// - `target_root`: 写入变更日志的扩展目录（打包临时目录）
pub fn generate_changelog(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    repo: &Path,
    git_ref: &str,
    version: &str,
    target_root: &Path,
    config: &ChangelogConfig,
) -> AppResult<PathBuf> {
    let from = previous_tag(ctx, runner, repo, git_ref);
    let commits = commits_between(ctx, runner, repo, from.as_deref(), git_ref)?;
    let lines = render_changelog(&commits, config)?;
    log::info!("为版本 {} 生成 {} 条变更记录", version, lines.len());
    prepend_changelog_section(target_root, version, &lines)
}

/// 去掉 App manifest 中的 setup secret，返回是否改写了文件
pub fn strip_app_secret(root: &Path) -> AppResult<bool> {
    let path = root.join(APP_MANIFEST_FILE);
    if !path.is_file() {
        return Ok(false);
    }
    let xml = std::fs::read_to_string(&path).map_err(|e| AppError::io("读取", &path, e))?;
    if parse_manifest(&xml)?.setup_secret.is_none() {
        return Ok(false);
    }
    write_file(&path, strip_setup_secret(&xml)?)?;
    log::info!("已移除 {} 中的 setup secret", path.display());
    Ok(true)
}

/// 图标超过最大边长时缩放为固定尺寸，返回是否改写了文件
pub fn resize_icon(path: &Path) -> AppResult<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let img = image::open(path)
        .map_err(|e| AppError::BuildError(format!("读取图标 {} 失败：{}", path.display(), e)))?;
    if img.width() <= ICON_MAX_SIZE && img.height() <= ICON_MAX_SIZE {
        return Ok(false);
    }

    log::info!(
        "图标 {}x{} 超出限制，缩放到 {}x{}",
        img.width(),
        img.height(),
        ICON_MAX_SIZE,
        ICON_MAX_SIZE
    );
    img.resize_exact(ICON_MAX_SIZE, ICON_MAX_SIZE, FilterType::Lanczos3)
        .save(path)
        .map_err(|e| AppError::BuildError(format!("写入图标 {} 失败：{}", path.display(), e)))?;
    Ok(true)
}
