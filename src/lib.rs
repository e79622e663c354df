// ============================================================================
// [总线] 程序的组装车间
// ✅ 只能做：pub mod 暴露子模块
// ⛔ 禁止：直接实现 command 函数
// ============================================================================

pub mod commands;
pub mod config;
pub mod dumper;
pub mod extension;
pub mod models;
pub mod services;
pub mod utils;
