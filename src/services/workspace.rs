// ============================================================================
// 平台工作区：slow path 构建所需的平台源码目录
// ✅ 只能做：浅克隆、写入状态文件、准备工作区自身的 npm 依赖
// ============================================================================

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::extension::catalogue::dev_version;
use crate::extension::version::Version;
use crate::models::dtos::BuildConfigMap;
use crate::services::installer::{run_install_jobs, InstallJob, NODE_MODULES, NPM_ENV, PACKAGE_JSON};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::write_file;
use crate::utils::process::{CommandSpec, ProcessRunner};

/// 覆盖平台源码仓库地址的环境变量
pub const REPOSITORY_URL_ENV: &str = "PLATFORM_REPOSITORY_URL";

pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/platform/platform.git";

/// 开发版本对应的分支
pub const DEV_BRANCH: &str = "trunk";

pub const ADMIN_APP_DIR: &str = "Resources/app/administration";
pub const STOREFRONT_APP_DIR: &str = "Resources/app/storefront";

/// 需要从 storefront 锁文件中剔除、再单独安装的包
const CANIUSE_PACKAGE: &str = "caniuse-lite";

pub fn repository_url() -> String {
    std::env::var(REPOSITORY_URL_ENV)
        .ok()
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_REPOSITORY_URL.to_string())
}

/// 版本 → 克隆分支：开发版本为 trunk，其余为 v<版本号>
pub fn branch_for_version(version: &Version) -> String {
    if version == &dev_version() {
        DEV_BRANCH.to_string()
    } else {
        format!("v{}", version)
    }
}

/// 浅克隆平台源码到 `target`
pub fn clone_workspace(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    version: &Version,
    target: &Path,
) -> AppResult<()> {
    let branch = branch_for_version(version);
    let url = repository_url();
    log::info!("克隆平台源码 {}（{}）到 {}", url, branch, target.display());

    let spec = CommandSpec::new("git").args([
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        "--branch".to_string(),
        branch,
        url,
        target.to_string_lossy().to_string(),
    ]);
    runner.run(ctx, &spec)?;
    Ok(())
}

/// 定位平台组件目录，兼容源码仓库与 vendor 安装两种布局
///
/// # 参数
/// - `component`: 组件名（Administration / Storefront / Core）
/// - `rel`: 组件内的相对路径
pub fn platform_path(root: &Path, component: &str, rel: &str) -> PathBuf {
    let source_checkout = root.join("src").join(component);
    if source_checkout.is_dir() {
        return source_checkout.join(rel);
    }
    let mono = root
        .join("vendor")
        .join("platform")
        .join("platform")
        .join("src")
        .join(component);
    if mono.is_dir() {
        return mono.join(rel);
    }
    root.join("vendor")
        .join("platform")
        .join(component.to_lowercase())
        .join(rel)
}

/// 写入 var/plugins.json 与 var/features.json
pub fn write_state_files(root: &Path, entries: &BuildConfigMap) -> AppResult<()> {
    let var = root.join("var");
    let plugins = serde_json::to_string_pretty(entries)?;
    write_file(&var.join("plugins.json"), plugins)?;
    write_file(&var.join("features.json"), "{}")?;
    Ok(())
}

/// 从 package-lock.json 中移除 caniuse-lite（v1 的 dependencies 与 v2/v3 的 packages）
pub fn strip_caniuse_lite(lock: &str) -> AppResult<String> {
    let mut doc: Value = serde_json::from_str(lock)
        .map_err(|e| AppError::ConfigError(format!("package-lock.json 格式错误：{}", e)))?;

    if let Some(packages) = doc.get_mut("packages").and_then(Value::as_object_mut) {
        let suffix = format!("node_modules/{}", CANIUSE_PACKAGE);
        packages.retain(|key, _| !key.ends_with(&suffix));
    }
    if let Some(deps) = doc.get_mut("dependencies").and_then(Value::as_object_mut) {
        deps.shift_remove(CANIUSE_PACKAGE);
    }

    let mut out = serde_json::to_string_pretty(&doc)?;
    out.push('\n');
    Ok(out)
}

/// package.json 是否声明了某个 script
pub fn package_has_script(dir: &Path, script: &str) -> AppResult<bool> {
    let path = dir.join(PACKAGE_JSON);
    if !path.is_file() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| AppError::io("读取", &path, e))?;
    let manifest: Value = serde_json::from_str(&content)
        .map_err(|e| AppError::ConfigError(format!("{} 格式错误：{}", path.display(), e)))?;
    Ok(manifest
        .get("scripts")
        .and_then(|s| s.get(script))
        .is_some())
}

fn npm(args: &[&str], dir: &Path) -> CommandSpec {
    let mut spec = CommandSpec::new("npm").args(args.iter().copied()).cwd(dir);
    for (key, value) in NPM_ENV {
        spec = spec.env(key, *value);
    }
    spec
}

/// 管理后台依赖缺失时安装，返回新建的 node_modules
pub fn prepare_administration(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    admin_root: &Path,
) -> AppResult<Vec<PathBuf>> {
    if admin_root.join(NODE_MODULES).is_dir() {
        return Ok(Vec::new());
    }
    run_install_jobs(
        ctx,
        vec![InstallJob {
            dir: admin_root.to_path_buf(),
            strict_production: false,
        }],
        runner,
    )
}

/// 店面依赖准备：剔除 caniuse-lite → 安装 → 单独安装 caniuse-lite → postinstall → copy-to-vendor
pub fn prepare_storefront(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    storefront_root: &Path,
) -> AppResult<Vec<PathBuf>> {
    let mut installed = Vec::new();

    if !storefront_root.join(NODE_MODULES).is_dir() {
        let lock_path = storefront_root.join("package-lock.json");
        if lock_path.is_file() {
            let lock = std::fs::read_to_string(&lock_path)
                .map_err(|e| AppError::io("读取", &lock_path, e))?;
            write_file(&lock_path, strip_caniuse_lite(&lock)?)?;
        }

        installed = run_install_jobs(
            ctx,
            vec![InstallJob {
                dir: storefront_root.to_path_buf(),
                strict_production: false,
            }],
            runner,
        )?;

        runner.run(
            ctx,
            &npm(&["install", CANIUSE_PACKAGE, "--no-audit", "--no-fund"], storefront_root),
        )?;

        if package_has_script(storefront_root, "postinstall")? {
            runner.run(ctx, &npm(&["run", "postinstall"], storefront_root))?;
        }
    }

    if !storefront_root.join("vendor").is_dir()
        && package_has_script(storefront_root, "copy-to-vendor")?
    {
        runner.run(ctx, &npm(&["run", "copy-to-vendor"], storefront_root))?;
    }

    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::testing::RecordingRunner;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_branch_for_version() {
        assert_eq!(branch_for_version(&Version::new(6, 5, 8, 0)), "v6.5.8.0");
        assert_eq!(branch_for_version(&dev_version()), "trunk");
    }

    #[test]
    fn test_platform_path_layouts() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            platform_path(dir.path(), "Storefront", STOREFRONT_APP_DIR),
            dir.path().join("vendor/platform/storefront/Resources/app/storefront")
        );
        fs::create_dir_all(dir.path().join("src/Storefront")).unwrap();
        assert_eq!(
            platform_path(dir.path(), "Storefront", STOREFRONT_APP_DIR),
            dir.path().join("src/Storefront/Resources/app/storefront")
        );
    }

    #[test]
    fn test_strip_caniuse_lite_both_lock_formats() {
        let lock = r#"{
            "lockfileVersion": 3,
            "packages": {
                "": {"name": "storefront"},
                "node_modules/caniuse-lite": {"version": "1.0.1"},
                "node_modules/browserslist/node_modules/caniuse-lite": {"version": "1.0.0"},
                "node_modules/webpack": {"version": "5.0.0"}
            },
            "dependencies": {"caniuse-lite": {"version": "1.0.1"}, "webpack": {}}
        }"#;
        let out = strip_caniuse_lite(lock).unwrap();
        let doc: Value = serde_json::from_str(&out).unwrap();
        let packages = doc["packages"].as_object().unwrap();
        assert_eq!(packages.len(), 2);
        assert!(packages.contains_key("node_modules/webpack"));
        assert!(doc["dependencies"].get("caniuse-lite").is_none());
        assert!(doc["dependencies"].get("webpack").is_some());
    }

    #[test]
    fn test_write_state_files() {
        let dir = TempDir::new().unwrap();
        write_state_files(dir.path(), &BuildConfigMap::new()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("var/features.json")).unwrap(),
            "{}"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("var/plugins.json")).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_prepare_storefront_sequence() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(
            root.join(PACKAGE_JSON),
            r#"{"scripts":{"postinstall":"x","copy-to-vendor":"y"}}"#,
        )
        .unwrap();
        fs::write(
            root.join("package-lock.json"),
            r#"{"packages":{"node_modules/caniuse-lite":{}}}"#,
        )
        .unwrap();

        let runner = RecordingRunner::new();
        let installed = prepare_storefront(&Context::new(), &runner, root).unwrap();
        assert_eq!(installed, vec![root.join(NODE_MODULES)]);

        let args: Vec<Vec<String>> = runner.calls().into_iter().map(|c| c.args).collect();
        assert_eq!(args[0][0], "install");
        assert_eq!(args[1][..2], ["install".to_string(), "caniuse-lite".to_string()]);
        assert_eq!(args[2], vec!["run", "postinstall"]);
        assert_eq!(args[3], vec!["run", "copy-to-vendor"]);
        assert!(!fs::read_to_string(root.join("package-lock.json"))
            .unwrap()
            .contains("caniuse-lite"));
    }

    #[test]
    fn test_prepare_storefront_skips_when_installed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(PACKAGE_JSON), r#"{"scripts":{}}"#).unwrap();
        fs::create_dir_all(dir.path().join(NODE_MODULES)).unwrap();
        fs::create_dir_all(dir.path().join("vendor")).unwrap();
        let runner = RecordingRunner::new();
        assert!(prepare_storefront(&Context::new(), &runner, dir.path())
            .unwrap()
            .is_empty());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_clone_uses_shallow_branch() {
        let dir = TempDir::new().unwrap();
        let runner = RecordingRunner::new();
        clone_workspace(&Context::new(), &runner, &Version::new(6, 4, 20, 0), dir.path()).unwrap();
        let call = &runner.calls_of("git")[0];
        assert_eq!(&call.args[..5], ["clone", "--depth", "1", "--branch", "v6.4.20.0"]);
    }
}
