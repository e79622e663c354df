// ============================================================================
// 依赖安装服务：在所有候选目录并行执行 npm install
// ✅ 只能做：计算候选目录、去重、调度 worker 线程
// ⛔ 禁止：决定构建路径（由 asset_builder 负责）
// ============================================================================

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Mutex;

use serde_json::Value;

use crate::models::dtos::{BuildConfigEntry, BuildConfigMap};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::remove_paths;
use crate::utils::process::{CommandSpec, ProcessRunner};

pub const PACKAGE_JSON: &str = "package.json";
pub const NODE_MODULES: &str = "node_modules";

/// npm install 的固定参数
pub const NPM_INSTALL_ARGS: &[&str] = &[
    "install",
    "--no-audit",
    "--no-fund",
    "--prefer-offline",
    "--loglevel=error",
];

/// 关闭遥测、广告与无头浏览器下载
pub const NPM_ENV: &[(&str, &str)] = &[
    ("PUPPETEER_SKIP_DOWNLOAD", "1"),
    ("NPM_CONFIG_FUND", "false"),
    ("NPM_CONFIG_AUDIT", "false"),
    ("NPM_CONFIG_UPDATE_NOTIFIER", "false"),
];

/// 一次安装任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallJob {
    pub dir: PathBuf,
    /// 仅安装生产依赖；dependencies 为空时直接跳过
    pub strict_production: bool,
}

/// 在候选目录并行安装依赖
///
/// # 参数
/// - `entries`: 扫描得到的构建配置
/// - `force`: 为 true 时即使已有 node_modules 也重新安装
///
/// # 返回
/// 本次新建的 node_modules 目录（调用方据此在结束时清理）
pub fn install_node_modules(
    ctx: &Context,
    entries: &BuildConfigMap,
    force: bool,
    runner: &dyn ProcessRunner,
) -> AppResult<Vec<PathBuf>> {
    let jobs = collect_install_jobs(entries, force);
    run_install_jobs(ctx, jobs, runner)
}

/// 按固定顺序生成候选目录，过滤并去重
pub fn collect_install_jobs(entries: &BuildConfigMap, force: bool) -> Vec<InstallJob> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut jobs = Vec::new();

    for entry in entries.values() {
        let base = PathBuf::from(&entry.base_path);
        for dir in candidate_dirs(&base, entry) {
            if !dir.join(PACKAGE_JSON).is_file() {
                continue;
            }
            if !force && dir.join(NODE_MODULES).is_dir() {
                continue;
            }
            if !seen.insert(dir.clone()) {
                continue;
            }
            jobs.push(InstallJob {
                dir,
                strict_production: entry.strict_production_install,
            });
        }
    }

    jobs
}

fn candidate_dirs(base: &Path, entry: &BuildConfigEntry) -> Vec<PathBuf> {
    let mut dirs = vec![base.join("Resources").join("app"), base.to_path_buf()];

    let mut ancestor = base.parent();
    for _ in 0..3 {
        match ancestor {
            Some(dir) => {
                dirs.push(dir.to_path_buf());
                ancestor = dir.parent();
            }
            None => break,
        }
    }

    if entry.administration.entry_file_path.is_some() {
        let admin = base.join("Resources").join("app").join("administration");
        dirs.push(admin.clone());
        dirs.push(admin.join("src"));
    }
    if entry.storefront.entry_file_path.is_some() {
        let storefront = base.join("Resources").join("app").join("storefront");
        dirs.push(storefront.clone());
        dirs.push(storefront.join("src"));
    }

    dirs
}

/// 用 CPU 数量的 worker 执行安装任务；第一个错误会停止后续派发
pub fn run_install_jobs(
    ctx: &Context,
    jobs: Vec<InstallJob>,
    runner: &dyn ProcessRunner,
) -> AppResult<Vec<PathBuf>> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    ctx.check()?;

    let job_count = jobs.len();
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(job_count);
    log::info!("安装 {} 处 npm 依赖（{} 个 worker）", job_count, workers);

    let (job_tx, job_rx) = sync_channel::<InstallJob>(job_count);
    for job in jobs {
        job_tx
            .send(job)
            .map_err(|e| AppError::BuildError(format!("派发安装任务失败：{}", e)))?;
    }
    // 全部入队后关闭，worker 收到 Err 即退出
    drop(job_tx);

    let job_rx = Mutex::new(job_rx);
    let stop = AtomicBool::new(false);
    let (result_tx, result_rx) = sync_channel::<AppResult<Option<PathBuf>>>(job_count);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let result_tx = result_tx.clone();
            let job_rx = &job_rx;
            let stop = &stop;
            scope.spawn(move || loop {
                if ctx.is_cancelled() || stop.load(Ordering::SeqCst) {
                    break;
                }
                let next = match job_rx.lock() {
                    Ok(rx) => rx.recv(),
                    Err(_) => break,
                };
                let Ok(job) = next else {
                    break;
                };
                let result = install_one(ctx, runner, &job);
                if result.is_err() {
                    stop.store(true, Ordering::SeqCst);
                }
                if result_tx.send(result).is_err() {
                    break;
                }
            });
        }
        drop(result_tx);
    });

    let mut installed = Vec::new();
    let mut first_error = None;
    for result in result_rx {
        match result {
            Ok(Some(dir)) => installed.push(dir),
            Ok(None) => {}
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    installed.sort();

    if let Some(err) = first_error {
        remove_paths(&installed);
        return Err(err);
    }
    ctx.check().inspect_err(|_| remove_paths(&installed))?;

    Ok(installed)
}

fn install_one(ctx: &Context, runner: &dyn ProcessRunner, job: &InstallJob) -> AppResult<Option<PathBuf>> {
    let manifest_path = job.dir.join(PACKAGE_JSON);
    let content = std::fs::read_to_string(&manifest_path)
        .map_err(|e| AppError::io("读取", &manifest_path, e))?;
    let manifest: Value = serde_json::from_str(&content).map_err(|e| {
        AppError::ValidationError(format!("{} 格式错误：{}", manifest_path.display(), e))
    })?;

    if job.strict_production && !has_production_dependencies(&manifest) {
        log::info!("{} 没有生产依赖，跳过安装", job.dir.display());
        return Ok(None);
    }

    let mut spec = CommandSpec::new("npm").args(NPM_INSTALL_ARGS.iter().copied()).cwd(&job.dir);
    if job.strict_production {
        spec = spec.arg("--omit=dev");
    }
    for (key, value) in NPM_ENV {
        spec = spec.env(key, *value);
    }

    log::info!("npm install：{}", job.dir.display());
    runner.run(ctx, &spec)?;
    Ok(Some(job.dir.join(NODE_MODULES)))
}

fn has_production_dependencies(manifest: &Value) -> bool {
    manifest
        .get("dependencies")
        .and_then(Value::as_object)
        .map(|deps| !deps.is_empty())
        .unwrap_or(false)
}
