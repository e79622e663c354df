// ============================================================================
// 扩展相关 Commands
// 负责：构建单个扩展的前端资源、打包发布 ZIP、发布前校验
// ============================================================================

use std::path::{Path, PathBuf};

use crate::config::ExtensionConfig;
use crate::extension::Extension;
use crate::models::dtos::{PackResult, ValidationIssue};
use crate::services::asset_builder::{build_assets, BuildAssetsOptions, BuildCollaborators, BuildSummary};
use crate::services::packer::{pack_extension, PackOptions};
use crate::services::scanner::{build_config_entries, sources_for_extension, ScanOptions};
use crate::services::validator;
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};

/// 构建单个扩展的前端资源
///
/// # 参数
/// - `root`: 扩展根目录
/// - `workspace`: 已有的平台目录，为空时临时克隆
pub fn build_extension(
    ctx: &Context,
    root: &Path,
    workspace: Option<PathBuf>,
    source_maps: bool,
    collab: &BuildCollaborators<'_>,
) -> AppResult<BuildSummary> {
    let extension = Extension::load(root)?;
    let config = ExtensionConfig::load(extension.root_dir())?;

    let sources = sources_for_extension(&extension, &config)?;
    let entries = build_config_entries(&sources, &ScanOptions::default())?;

    let options = BuildAssetsOptions {
        workspace_root: workspace,
        compatibility: extension.compatibility()?,
        source_maps,
        ..BuildAssetsOptions::default()
    };
    log::info!("构建扩展 {} 的资源（{} 个条目）", extension.name(), entries.len());
    build_assets(ctx, &entries, &options, collab)
}

/// 打包扩展为发布 ZIP
pub fn zip_extension(
    ctx: &Context,
    root: &Path,
    options: &PackOptions,
    collab: &BuildCollaborators<'_>,
) -> AppResult<PackResult> {
    let result = pack_extension(ctx, root, options, collab)?;
    log::info!(
        "已生成 {}（{} 个文件）",
        result.zip_path.display(),
        result.file_count
    );
    Ok(result)
}

/// 校验扩展，有问题时返回 ValidationError
pub fn validate_extension(root: &Path) -> AppResult<Vec<ValidationIssue>> {
    let extension = Extension::load(root)?;
    let config = ExtensionConfig::load(extension.root_dir())?;
    let issues = validator::validate_extension(&extension, &config)?;
    if issues.is_empty() {
        log::info!("扩展 {} 校验通过", extension.name());
        return Ok(issues);
    }
    Err(AppError::ValidationError(format!(
        "扩展 {} 有 {} 个问题：{}",
        extension.name(),
        issues.len(),
        issues
            .iter()
            .map(|i| i.identifier.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}
