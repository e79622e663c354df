// ============================================================================
// 执行上下文：取消信号 + 截止时间
// 每个长耗时调用都显式接收 &Context，不保存在长生命周期的结构体里
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::error::{AppError, AppResult};

/// 贯穿整个调用链的执行上下文
///
/// 克隆后共享同一个取消标记，任意一份调用 `cancel()` 都会让所有持有者感知到。
#[derive(Clone, Debug, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 派生一个带超时的子上下文（与父上下文共享取消标记）
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        Context {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// 在每个挂起点调用：已取消或已超时则返回 Cancelled
    pub fn check(&self) -> AppResult<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    /// 返回剩余时间，用于给 HTTP 请求设置超时
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}
