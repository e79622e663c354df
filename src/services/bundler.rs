// ============================================================================
// 进程内打包器（fast path）
// ============================================================================
//
// AssetBundler trait 描述 fast path 需要的两个能力：编译单个扩展的资源、
// 为管理后台写出 manifest。默认实现 EsbuildBundler 通过 ProcessRunner 调用 esbuild，
// 测试中替换为只写产物文件的记录实现。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use walkdir::WalkDir;

use crate::models::dtos::{AssetTarget, BuildConfigEntry};
use crate::services::scanner::{
    ADMIN_ENTRY_FILES, ADMIN_FAST_PATH_MANIFEST, ADMIN_PUBLIC_DIR, STOREFRONT_DIST_DIR,
    STOREFRONT_ENTRY_FILES,
};
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::services::archive::copy_tree;
use crate::utils::fs::{remove_paths, write_file};
use crate::utils::process::{CommandSpec, ProcessRunner};

/// 覆盖 esbuild 可执行文件路径的环境变量
pub const ESBUILD_BINARY_ENV: &str = "PLATFORM_ESBUILD_BINARY";
/// 覆盖 dart-sass 可执行文件路径的环境变量
pub const SASS_BINARY_ENV: &str = "PLATFORM_SASS_BINARY";

/// SCSS 预编译时源码副本所在目录（与 src/ 同级，保证 node_modules 解析不变）
pub const SASS_STAGING_DIR: &str = ".esbuild-src";

// ============================================================================
// 打包参数与结果
// ============================================================================

/// 单次编译的参数
#[derive(Debug, Clone, PartialEq)]
pub struct BundlerOptions {
    pub name: String,
    /// 扩展源码目录（含 Resources/）
    pub base_path: PathBuf,
    pub technical_name: String,
    pub target: AssetTarget,
    pub enable_scripts: bool,
    pub enable_styles: bool,
    pub disable_sass: bool,
    /// storefront 是否使用 6.6 起的嵌套输出目录
    pub storefront_new_layout: bool,
}

impl BundlerOptions {
    pub fn for_entry(
        name: &str,
        entry: &BuildConfigEntry,
        target: AssetTarget,
        storefront_new_layout: bool,
    ) -> Self {
        BundlerOptions {
            name: name.to_string(),
            base_path: PathBuf::from(&entry.base_path),
            technical_name: entry.technical_name.clone(),
            target,
            enable_scripts: true,
            enable_styles: true,
            disable_sass: entry.disable_css_preprocessor,
            storefront_new_layout,
        }
    }

    fn entry_candidates(&self) -> &'static [&'static str] {
        match self.target {
            AssetTarget::Administration => ADMIN_ENTRY_FILES,
            AssetTarget::Storefront => STOREFRONT_ENTRY_FILES,
        }
    }

    /// 第一个存在的入口文件
    pub fn entry_file(&self) -> Option<PathBuf> {
        self.entry_candidates()
            .iter()
            .map(|rel| self.base_path.join(rel))
            .find(|p| p.is_file())
    }

    /// JS 产物路径
    pub fn output_js(&self) -> PathBuf {
        let file = format!("{}.js", self.technical_name);
        match self.target {
            AssetTarget::Administration => self.base_path.join(ADMIN_PUBLIC_DIR).join("js").join(file),
            AssetTarget::Storefront if self.storefront_new_layout => self
                .base_path
                .join(STOREFRONT_DIST_DIR)
                .join(&self.technical_name)
                .join(file),
            AssetTarget::Storefront => self.base_path.join(STOREFRONT_DIST_DIR).join(file),
        }
    }

    /// CSS 产物路径（仅管理后台单独输出样式）
    pub fn output_css(&self) -> Option<PathBuf> {
        match self.target {
            AssetTarget::Administration if self.enable_styles => Some(
                self.base_path
                    .join(ADMIN_PUBLIC_DIR)
                    .join("css")
                    .join(format!("{}.css", self.technical_name)),
            ),
            _ => None,
        }
    }
}

/// 编译结果
#[derive(Debug, Clone, PartialEq)]
pub struct CompileResult {
    pub entry: PathBuf,
    pub js_file: PathBuf,
    pub css_file: Option<PathBuf>,
}

// ============================================================================
// 打包器 Trait 定义
// ============================================================================

/// 进程内打包器
pub trait AssetBundler: Send + Sync {
    /// 编译单个扩展的资源；入口文件不存在时返回 EntrypointNotFound
    fn compile_extension_asset(&self, ctx: &Context, options: &BundlerOptions)
        -> AppResult<CompileResult>;

    /// 写出管理后台的 fast path manifest，返回 manifest 路径
    fn dump_fast_path_manifest(
        &self,
        ctx: &Context,
        options: &BundlerOptions,
        result: &CompileResult,
    ) -> AppResult<PathBuf>;
}

// ============================================================================
// esbuild 实现
// ============================================================================

pub struct EsbuildBundler {
    runner: Arc<dyn ProcessRunner>,
    binary: String,
    sass_binary: String,
}

fn binary_from_env(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl EsbuildBundler {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        EsbuildBundler {
            runner,
            binary: binary_from_env(ESBUILD_BINARY_ENV, "esbuild"),
            sass_binary: binary_from_env(SASS_BINARY_ENV, "sass"),
        }
    }

    /// 把入口所在的源码目录复制到暂存目录，并用 dart-sass 就地编译其中的 SCSS
    ///
    /// esbuild 只认识 CSS，编译结果保留 .scss 文件名，JS 中的 import 路径无需改动。
    /// 以 `_` 开头的 partial 只会被其他 SCSS 引入，不单独编译。
    ///
    /// # 返回
    /// 暂存目录中的入口文件；源码中没有 SCSS 时返回 None
    fn stage_sass_sources(
        &self,
        ctx: &Context,
        options: &BundlerOptions,
        entry: &Path,
    ) -> AppResult<Option<(PathBuf, PathBuf)>> {
        let (Some(src_dir), Some(file_name)) = (entry.parent(), entry.file_name()) else {
            return Ok(None);
        };
        let stylesheets = collect_stylesheets(src_dir)?;
        if stylesheets.is_empty() {
            return Ok(None);
        }

        let staging = src_dir
            .parent()
            .unwrap_or(src_dir)
            .join(SASS_STAGING_DIR);
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| AppError::io("删除", &staging, e))?;
        }
        copy_tree(src_dir, &staging)?;

        let pairs: Vec<String> = stylesheets
            .iter()
            .filter(|rel| !is_partial(rel))
            .map(|rel| {
                format!(
                    "{}:{}",
                    src_dir.join(rel).to_string_lossy(),
                    staging.join(rel).to_string_lossy()
                )
            })
            .collect();
        if !pairs.is_empty() {
            log::debug!("{} 预编译 {} 个 SCSS 文件", options.name, pairs.len());
            let spec = CommandSpec::new(&self.sass_binary)
                .args(["--no-source-map", "--style=compressed"])
                .arg(format!("--load-path={}", src_dir.to_string_lossy()))
                .args(pairs)
                .cwd(&options.base_path);
            self.runner.run(ctx, &spec)?;
        }

        Ok(Some((staging.join(file_name), staging)))
    }

    fn command(&self, options: &BundlerOptions, entry: &Path, js_file: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.binary)
            .arg(entry.to_string_lossy())
            .args([
                "--bundle",
                "--minify",
                "--format=iife",
                "--target=es2020",
                "--loader:.twig=text",
                "--loader:.html=text",
                "--loader:.svg=text",
                "--log-level=warning",
            ])
            .arg(format!("--outfile={}", js_file.to_string_lossy()))
            .arg("--define:process.env.NODE_ENV=\"production\"")
            .cwd(&options.base_path);

        if !options.enable_styles || options.disable_sass {
            spec = spec.arg("--loader:.scss=empty").arg("--loader:.css=empty");
        } else {
            spec = spec.arg("--loader:.scss=css");
        }
        if options.target == AssetTarget::Administration {
            spec = spec.arg(format!("--global-name={}", global_name(&options.technical_name)));
        }
        spec
    }
}

impl AssetBundler for EsbuildBundler {
    fn compile_extension_asset(
        &self,
        ctx: &Context,
        options: &BundlerOptions,
    ) -> AppResult<CompileResult> {
        ctx.check()?;
        let entry = options.entry_file().ok_or_else(|| {
            AppError::EntrypointNotFound(format!(
                "{}（{}）",
                options.name,
                options.base_path.display()
            ))
        })?;

        let js_file = options.output_js();
        if let Some(parent) = js_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io("创建目录", parent, e))?;
        }

        let to_bundler_error = |e: AppError| match e {
            AppError::Cancelled => AppError::Cancelled,
            other => AppError::BundlerError(format!("{} 编译失败：{}", options.name, other)),
        };

        let staged = if options.enable_styles && !options.disable_sass {
            self.stage_sass_sources(ctx, options, &entry)
                .map_err(to_bundler_error)?
        } else {
            None
        };
        let _staging_guard = scopeguard::guard(staged.as_ref().map(|(_, dir)| dir.clone()), |dir| {
            if let Some(dir) = dir {
                remove_paths(&[dir]);
            }
        });
        let bundle_entry = staged.as_ref().map_or(entry.as_path(), |(e, _)| e.as_path());

        let spec = self.command(options, bundle_entry, &js_file);
        self.runner.run(ctx, &spec).map_err(to_bundler_error)?;

        // esbuild 会把引入的样式输出到同名 .css，管理后台需要移动到 css/ 目录
        let mut css_file = None;
        if let Some(target_css) = options.output_css() {
            let emitted = js_file.with_extension("css");
            if emitted.is_file() {
                if let Some(parent) = target_css.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| AppError::io("创建目录", parent, e))?;
                }
                std::fs::rename(&emitted, &target_css)
                    .map_err(|e| AppError::io("移动样式文件", &emitted, e))?;
                css_file = Some(target_css);
            }
        }

        log::info!("{} 的 {} 资源已编译", options.name, options.target.as_str());
        Ok(CompileResult {
            entry,
            js_file,
            css_file,
        })
    }

    fn dump_fast_path_manifest(
        &self,
        ctx: &Context,
        options: &BundlerOptions,
        result: &CompileResult,
    ) -> AppResult<PathBuf> {
        ctx.check()?;
        write_fast_path_manifest(options, result)
    }
}

/// 写出 .vite/manifest.json，路径相对 Resources/public/administration
pub fn write_fast_path_manifest(options: &BundlerOptions, result: &CompileResult) -> AppResult<PathBuf> {
    let public = options.base_path.join(ADMIN_PUBLIC_DIR);
    let relative = |p: &Path| {
        p.strip_prefix(&public)
            .map(crate::utils::fs::to_slash)
            .unwrap_or_else(|_| crate::utils::fs::to_slash(p))
    };
    let entry_name = result
        .entry
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "main.js".to_string());

    let mut chunk = json!({
        "file": relative(&result.js_file),
        "name": options.technical_name,
        "src": entry_name,
        "isEntry": true,
    });
    if let Some(css) = &result.css_file {
        chunk["css"] = json!([relative(css)]);
    }
    let mut manifest = serde_json::Map::new();
    manifest.insert(entry_name, chunk);

    let path = options.base_path.join(ADMIN_FAST_PATH_MANIFEST);
    let body = serde_json::to_string_pretty(&serde_json::Value::Object(manifest))?;
    write_file(&path, body)?;
    Ok(path)
}

/// 源码目录下全部 .scss 文件（相对路径，已排序，跳过 node_modules）
fn collect_stylesheets(src_dir: &Path) -> AppResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let walker = WalkDir::new(src_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != "node_modules");
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "scss")
        {
            if let Ok(rel) = entry.path().strip_prefix(src_dir) {
                found.push(rel.to_path_buf());
            }
        }
    }
    Ok(found)
}

fn is_partial(rel: &Path) -> bool {
    rel.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with('_'))
}

/// kebab-case 转 JS 全局变量名：swag-pay-pal → SwagPayPal
fn global_name(technical_name: &str) -> String {
    technical_name
        .split('-')
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// ============================================================================
// 测试辅助：记录调用并直接写出产物
// ============================================================================

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingBundler {
        pub compiled: Mutex<Vec<(String, AssetTarget)>>,
        pub manifests: Mutex<Vec<String>>,
    }

    impl RecordingBundler {
        pub fn compiled(&self) -> Vec<(String, AssetTarget)> {
            self.compiled.lock().unwrap().clone()
        }

        pub fn manifests(&self) -> Vec<String> {
            self.manifests.lock().unwrap().clone()
        }
    }

    impl AssetBundler for RecordingBundler {
        fn compile_extension_asset(
            &self,
            ctx: &Context,
            options: &BundlerOptions,
        ) -> AppResult<CompileResult> {
            ctx.check()?;
            let entry = options
                .entry_file()
                .ok_or_else(|| AppError::EntrypointNotFound(options.name.clone()))?;
            let js_file = options.output_js();
            write_file(&js_file, "/* compiled */")?;
            self.compiled
                .lock()
                .unwrap()
                .push((options.name.clone(), options.target));
            Ok(CompileResult {
                entry,
                js_file,
                css_file: None,
            })
        }

        fn dump_fast_path_manifest(
            &self,
            _ctx: &Context,
            options: &BundlerOptions,
            result: &CompileResult,
        ) -> AppResult<PathBuf> {
            self.manifests.lock().unwrap().push(options.name.clone());
            write_fast_path_manifest(options, result)
        }
    }
}
