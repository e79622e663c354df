// ============================================================================
// 扩展校验：发布前检查元数据是否完整
// ✅ 只能做：读取扩展信息、返回问题列表
// ⛔ 禁止：修改扩展目录
// ============================================================================

use crate::config::ExtensionConfig;
use crate::extension::{Extension, ExtensionType};
use crate::models::dtos::ValidationIssue;
use crate::utils::error::AppResult;

/// 插件与 bundle 的展示信息至少要有的语言
const REQUIRED_LOCALE: &str = "en-GB";

fn issue(identifier: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        identifier: identifier.to_string(),
        message: message.into(),
    }
}

/// 校验扩展，返回未被 `validation.ignore` 忽略的问题
///
/// 描述文件的 type 与插件类名在 [`Extension::load`] 时已经校验。
/// 读取 changelog 失败会直接返回错误，其余检查项以问题列表的形式返回。
pub fn validate_extension(
    extension: &Extension,
    config: &ExtensionConfig,
) -> AppResult<Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if extension.name().trim().is_empty() {
        issues.push(issue("metadata.name", "扩展名为空"));
    }

    match extension.version() {
        Ok(version) => {
            match extension.changelog()? {
                None => issues.push(issue("changelog.missing", "缺少 CHANGELOG_en-GB.md")),
                Some(changelog) => {
                    let raw = extension.version_str().trim();
                    if changelog.entries_for(raw).is_none()
                        && changelog.entries_for(&version.to_string()).is_none()
                    {
                        issues.push(issue(
                            "changelog.version",
                            format!("变更日志中没有当前版本 {} 的条目", raw),
                        ));
                    }
                }
            }
        }
        Err(e) => issues.push(issue("metadata.version", e.to_string())),
    }

    if extension.license().trim().is_empty() {
        issues.push(issue("metadata.license", "没有声明 license"));
    }

    match extension.compatibility() {
        Ok(Some(_)) => {}
        Ok(None) => issues.push(issue(
            "metadata.compatibility",
            "require 中没有声明平台核心包版本约束",
        )),
        Err(e) => issues.push(issue("metadata.compatibility", e.to_string())),
    }

    let metadata = extension.metadata();
    if extension.extension_type() != ExtensionType::App {
        if !metadata.label.contains_key(REQUIRED_LOCALE) {
            issues.push(issue(
                "metadata.label",
                format!("缺少 {} 语言的 label", REQUIRED_LOCALE),
            ));
        }
        if !metadata.description.contains_key(REQUIRED_LOCALE) {
            issues.push(issue(
                "metadata.description",
                format!("缺少 {} 语言的 description", REQUIRED_LOCALE),
            ));
        }
    }

    match extension.icon_path() {
        Some(icon) if icon.is_file() => {}
        Some(icon) => issues.push(issue(
            "icon.missing",
            format!("图标文件不存在：{}", icon.display()),
        )),
        None => issues.push(issue("icon.missing", "没有声明图标")),
    }

    issues.retain(|i| !config.validation.ignore.iter().any(|ignored| ignored == &i.identifier));
    for i in &issues {
        log::warn!("[{}] {}", i.identifier, i.message);
    }
    Ok(issues)
}
