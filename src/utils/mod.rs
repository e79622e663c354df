// ============================================================================
// 工具层：错误类型、执行上下文、子进程、文件系统辅助
// ============================================================================

pub mod context;
pub mod error;
pub mod fs;
pub mod process;
