// ============================================================================
// 业务层：纯 Rust 核心逻辑
// ✅ 特点：不关心命令行参数与输出格式，外部进程统一经 ProcessRunner，方便写 #[test]
// ⛔ 禁止：直接打印到 stdout、直接退出进程
// ============================================================================

pub mod archive;
pub mod asset_builder;
pub mod bundler;
pub mod checksum;
pub mod composer;
pub mod git;
pub mod installer;
pub mod packer;
pub mod release;
pub mod scanner;
pub mod validator;
pub mod workspace;

// ============================================================================
// 常量定义
// ============================================================================

/// 扫描项目时不下钻的目录名
///
/// vendor 不在其中：composer 安装的扩展位于 vendor/ 下，同样需要参与构建。
pub const SCAN_IGNORED_DIRS: &[&str] = &["node_modules", ".git", "var", "public", "files"];
