// ============================================================================
// 文件系统辅助函数
// ============================================================================

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// 解析为规范绝对路径（跟随符号链接），并统一追加末尾分隔符
pub fn canonical_dir(path: &Path) -> AppResult<String> {
    let abs = std::fs::canonicalize(path).map_err(|e| AppError::io("解析路径", path, e))?;
    let mut s = abs.to_string_lossy().to_string();
    while s.len() > 1 && s.ends_with(std::path::MAIN_SEPARATOR) {
        s.pop();
    }
    s.push(std::path::MAIN_SEPARATOR);
    Ok(s)
}

/// 相对路径统一使用正斜杠
pub fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// 批量删除目录或文件，失败只记录警告
///
/// 用于清理阶段（临时工作区、node_modules），任何一项失败都不应阻断其它项。
pub fn remove_paths(paths: &[PathBuf]) {
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else if path.exists() {
            std::fs::remove_file(path)
        } else {
            continue;
        };
        match result {
            Ok(()) => log::debug!("已删除 {}", path.display()),
            Err(e) => log::warn!("删除 {} 失败：{}", path.display(), e),
        }
    }
}

/// 创建父目录后写入文件
pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io("创建目录", parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| AppError::io("写入文件", path, e))
}
