// ============================================================================
// 统一错误类型定义
// 使用 thiserror 派生宏，所有 services 层统一返回 AppResult
// ============================================================================

use std::path::Path;

use thiserror::Error;

/// 应用统一错误枚举
///
/// 每个变体对应一类错误：用户输入错误、外部工具错误、IO 错误、数据库错误等。
/// 核心层只负责把错误向上抛出，退出码由 CLI 层决定。
#[derive(Debug, Error)]
pub enum AppError {
    /// 参数或输入验证失败（如扩展根目录不存在、版本约束非法）
    #[error("验证失败：{0}")]
    ValidationError(String),

    /// 配置文件格式错误
    #[error("配置错误：{0}")]
    ConfigError(String),

    /// 外部工具（npm、git、composer、esbuild）执行失败
    #[error("{tool} 执行失败：{message}")]
    ExternalToolError { tool: String, message: String },

    /// 构建过程中的错误（如文件复制、产物写入失败）
    #[error("构建失败：{0}")]
    BuildError(String),

    /// 扩展扫描失败
    #[error("扫描失败：{0}")]
    ScanError(String),

    /// ZIP 打包或解压错误
    #[error("归档失败：{0}")]
    ArchiveError(String),

    /// 文件系统 IO 错误（带路径和操作说明）
    #[error("IO 错误：{op} {path}: {source}")]
    IoError {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 数据库操作错误
    #[error("数据库错误：{0}")]
    DatabaseError(String),

    /// 版本号或版本约束解析失败
    #[error("版本错误：{0}")]
    VersionError(String),

    /// 获取平台版本目录失败
    #[error("版本目录获取失败：{0}")]
    CatalogueError(String),

    /// 进程内打包器错误
    #[error("打包器错误：{0}")]
    BundlerError(String),

    /// 打包器找不到入口文件
    #[error("cannot find entrypoint: {0}")]
    EntrypointNotFound(String),

    /// 操作被取消或超过截止时间
    #[error("cancelled")]
    Cancelled,
}

/// 便捷类型别名，统一项目内的 Result 签名
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// 包装带路径的 IO 错误
    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        AppError::IoError {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    /// 外部工具错误的快捷构造
    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        AppError::ExternalToolError {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError {
            op: "io",
            path: String::new(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ConfigError(format!("JSON 解析失败：{}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ConfigError(format!("YAML 解析失败：{}", err))
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::ArchiveError(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match err.into_io_error() {
            Some(source) => AppError::IoError {
                op: "遍历目录",
                path,
                source,
            },
            None => AppError::ScanError(format!("遍历目录失败（符号链接循环）：{}", path)),
        }
    }
}

impl From<mysql::Error> for AppError {
    fn from(err: mysql::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

/// 将 AppError 转换为 String，供 CLI 层输出
impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_contains_path_and_op() {
        let err = AppError::io(
            "写入文件",
            Path::new("/tmp/demo.txt"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("写入文件"));
        assert!(msg.contains("/tmp/demo.txt"));
    }

    #[test]
    fn test_tool_error_names_tool() {
        let err = AppError::tool("npm", "exit status 1");
        assert_eq!(err.to_string(), "npm 执行失败：exit status 1");
    }

    #[test]
    fn test_error_into_string() {
        let s: String = AppError::Cancelled.into();
        assert_eq!(s, "cancelled");
    }
}
