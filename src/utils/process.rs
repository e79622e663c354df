// ============================================================================
// 子进程执行：npm / git / composer / esbuild 统一走 ProcessRunner
// ✅ 只能做：启动进程、转发并收集合并输出、响应取消
// ============================================================================

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};

/// 轮询子进程状态的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 一次外部命令调用的完整描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: &str) -> Self {
        CommandSpec {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.envs.push((key.to_string(), value.into()));
        self
    }

    /// 用于日志输出的命令行文本
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// 外部进程执行策略 trait
///
/// 生产环境使用 [`SystemRunner`]，测试中替换为记录调用的实现。
pub trait ProcessRunner: Send + Sync {
    /// 执行命令并返回合并后的 stdout + stderr；非零退出码返回 ExternalToolError
    fn run(&self, ctx: &Context, spec: &CommandSpec) -> AppResult<String>;
}

/// 子进程输出的逐行转发目标
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// 真实启动子进程的执行器
///
/// 子进程的 stdout / stderr 按行实时转发（默认写到标准错误），
/// 同时保留一份合并输出作为返回值和错误信息。
#[derive(Clone, Default)]
pub struct SystemRunner {
    sink: Option<LineSink>,
}

impl SystemRunner {
    pub fn new() -> Self {
        SystemRunner::default()
    }

    /// 把转发目标替换为自定义回调
    pub fn with_sink(sink: LineSink) -> Self {
        SystemRunner { sink: Some(sink) }
    }

    fn line_sink(&self) -> LineSink {
        match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => {
                let stderr: LineSink = Arc::new(|line: &str| {
                    let _ = writeln!(std::io::stderr().lock(), "{}", line);
                });
                stderr
            }
        }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, ctx: &Context, spec: &CommandSpec) -> AppResult<String> {
        ctx.check()?;
        log::debug!("执行命令：{}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| {
            AppError::tool(&spec.program, format!("无法启动 {}：{}", spec.display(), e))
        })?;

        // 两路输出按到达顺序写入同一份记录
        let output = Arc::new(Mutex::new(String::new()));
        let sink = self.line_sink();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Arc::clone(&output), Arc::clone(&sink)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Arc::clone(&output), Arc::clone(&sink)));
        }

        let status = loop {
            if ctx.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(AppError::tool(
                        &spec.program,
                        format!("等待进程结束失败：{}", e),
                    ))
                }
            }
        };

        for reader in readers {
            let _ = reader.join();
        }

        let combined = output.lock().map(|buf| buf.clone()).unwrap_or_default();

        if !status.success() {
            return Err(AppError::tool(
                &spec.program,
                format!("{}（{}）", spec.display(), status),
            ));
        }

        Ok(combined)
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    capture: Arc<Mutex<String>>,
    sink: LineSink,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&raw);
                    sink(line.trim_end_matches(['\r', '\n']));
                    if let Ok(mut out) = capture.lock() {
                        out.push_str(&line);
                    }
                }
            }
        }
    })
}

// ============================================================================
// 测试辅助：记录所有命令调用，不真正启动进程
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("npm")
            .arg("install")
            .args(["--no-audit", "--no-fund"])
            .env("A", "1")
            .env("A", "2");
        assert_eq!(spec.display(), "npm install --no-audit --no-fund");
        assert_eq!(spec.env_value("A"), Some("2"));
        assert_eq!(spec.env_value("B"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_collects_output() {
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops 1>&2"]);
        let out = SystemRunner::new().run(&Context::new(), &spec).unwrap();
        assert!(out.contains("hello"));
        assert!(out.contains("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_non_zero_exit_is_tool_error() {
        let spec = CommandSpec::new("sh").args(["-c", "exit 3"]);
        let err = SystemRunner::new().run(&Context::new(), &spec).unwrap_err();
        assert!(matches!(err, AppError::ExternalToolError { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_forwards_lines_while_running() {
        let started = Instant::now();
        let seen: Arc<Mutex<Vec<(String, Duration)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let runner = SystemRunner::with_sink(Arc::new(move |line: &str| {
            recorder
                .lock()
                .unwrap()
                .push((line.to_string(), started.elapsed()));
        }));

        let spec = CommandSpec::new("sh").args(["-c", "echo resolving; echo warn 1>&2; sleep 1; exit 2"]);
        let err = runner.run(&Context::new(), &spec).unwrap_err();
        let finished = started.elapsed();
        assert!(matches!(err, AppError::ExternalToolError { .. }));

        let seen = seen.lock().unwrap();
        let lines: Vec<&str> = seen.iter().map(|(l, _)| l.as_str()).collect();
        assert!(lines.contains(&"resolving"));
        assert!(lines.contains(&"warn"));
        // 输出在进程退出前就已转发
        for (_, at) in seen.iter() {
            assert!(finished - *at >= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_system_runner_missing_binary() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz");
        assert!(SystemRunner::new().run(&Context::new(), &spec).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_honours_cancellation() {
        let ctx = Context::new();
        let canceller = ctx.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            canceller.cancel();
        });
        let spec = CommandSpec::new("sh").args(["-c", "sleep 10"]);
        let err = SystemRunner::new().run(&ctx, &spec).unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, AppError::Cancelled));
    }
}
