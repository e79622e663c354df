// ============================================================================
// composer.json 改写：面向 6.5 之前的平台版本，把平台组件的依赖
// 固定到对应版本的组件清单中，并在打包目录里安装剩余的第三方依赖
// ✅ 只能做：改写 require / replace / provide、调用 composer、恢复原文件
// ============================================================================

use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::extension::plugin::COMPOSER_FILE;
use crate::extension::version::Version;
use crate::utils::context::Context;
use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::write_file;
use crate::utils::process::{CommandSpec, ProcessRunner};

/// 平台核心组件：包名 → 内置清单中的文件名
pub const PLATFORM_COMPONENTS: &[(&str, &str)] = &[
    ("platform/core", "core"),
    ("platform/administration", "administration"),
    ("platform/storefront", "storefront"),
    ("platform/elasticsearch", "elasticsearch"),
];

/// 平台运行时已提供的包，从 require 移到 provide
pub const PROVIDED_PACKAGES: &[&str] = &[
    "platform/platform",
    "platform/core",
    "platform/administration",
    "platform/storefront",
    "platform/elasticsearch",
    "platform/recovery",
    "composer/installers",
];

// 内置组件清单 COMPONENT_MAPS：(平台版本, 组件, JSON 内容)，由 build.rs 从 composer/ 目录生成
include!(concat!(env!("OUT_DIR"), "/component_maps.rs"));

/// 6.5 起平台不再需要改写
pub fn needs_rewrite(version: &Version) -> bool {
    version < &Version::new(6, 5, 0, 0)
}

/// 选择内置清单版本
///
/// 优先精确匹配，否则取不高于目标的最高版本；目标比全部内置版本都旧时
/// 退回最低的内置版本并记录警告。
fn embedded_version(version: &Version) -> AppResult<&'static str> {
    let mut available: Vec<(Version, &'static str)> = Vec::new();
    for &(raw, _, _) in COMPONENT_MAPS {
        let candidate = Version::parse(raw)?;
        if !available.iter().any(|(v, _)| *v == candidate) {
            available.push((candidate, raw));
        }
    }
    available.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some((_, raw)) = available.iter().rev().find(|(v, _)| v <= version) {
        return Ok(*raw);
    }
    let (oldest, raw) = available
        .first()
        .ok_or_else(|| AppError::VersionError("没有内置的组件清单".to_string()))?;
    log::warn!("平台版本 {} 早于所有内置组件清单，使用 {} 的清单", version, oldest);
    Ok(*raw)
}

/// 读取某个平台版本下某个组件的依赖清单
pub fn component_map(version: &Version, component: &str) -> AppResult<IndexMap<String, String>> {
    let embedded = embedded_version(version)?;
    let content = COMPONENT_MAPS
        .iter()
        .find(|(v, c, _)| *v == embedded && *c == component)
        .map(|(_, _, content)| *content)
        .ok_or_else(|| {
            AppError::VersionError(format!("平台版本 {} 缺少组件 {} 的清单", embedded, component))
        })?;
    Ok(serde_json::from_str(content)?)
}

fn object_field(doc: &Value, key: &str) -> Map<String, Value> {
    doc.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// 生成改写后的 composer.json
///
/// # 参数
/// - `manifest`: 原始 composer.json
/// - `version`: 最低匹配的平台版本
/// - `excluded_packages`: 用户额外声明、需要移到 provide 的包
///
/// # 返回
/// 改写后的文档；require 被清空时返回 None（无需安装）
pub fn rewrite_manifest(
    manifest: &Value,
    version: &Version,
    excluded_packages: &[String],
) -> AppResult<Option<Value>> {
    let original_require = object_field(manifest, "require");
    let mut require = original_require.clone();
    let mut replace = object_field(manifest, "replace");
    let mut provide = object_field(manifest, "provide");

    for (package, component) in PLATFORM_COMPONENTS {
        if !original_require.contains_key(*package) {
            continue;
        }
        for (name, pinned) in component_map(version, component)? {
            replace.insert(name, Value::String(pinned));
        }
        require.shift_remove(*package);
    }

    let provided = PROVIDED_PACKAGES
        .iter()
        .copied()
        .chain(excluded_packages.iter().map(String::as_str));
    for package in provided {
        if original_require.contains_key(package) {
            require.shift_remove(package);
            provide.insert(package.to_string(), Value::String("*".to_string()));
        }
    }

    if require.is_empty() {
        return Ok(None);
    }

    let mut doc = manifest.clone();
    let Some(obj) = doc.as_object_mut() else {
        return Err(AppError::ConfigError("composer.json 顶层必须是对象".to_string()));
    };
    obj.insert("require".to_string(), Value::Object(require));
    if !replace.is_empty() {
        obj.insert("replace".to_string(), Value::Object(replace));
    }
    if !provide.is_empty() {
        obj.insert("provide".to_string(), Value::Object(provide));
    }
    Ok(Some(doc))
}

/// 在扩展目录中用改写后的 composer.json 安装依赖，结束后恢复原文件
///
/// 无论安装成功与否，composer.json 都会恢复为原始字节。
///
/// # 返回
/// 是否实际执行了 composer
pub fn install_with_rewritten_manifest(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    extension_root: &Path,
    version: &Version,
    excluded_packages: &[String],
) -> AppResult<bool> {
    let manifest_path = extension_root.join(COMPOSER_FILE);
    let original =
        std::fs::read(&manifest_path).map_err(|e| AppError::io("读取", &manifest_path, e))?;
    let manifest: Value = serde_json::from_slice(&original)
        .map_err(|e| AppError::ConfigError(format!("{} 格式错误：{}", manifest_path.display(), e)))?;

    let Some(rewritten) = rewrite_manifest(&manifest, version, excluded_packages)? else {
        log::info!("require 中没有第三方依赖，跳过 composer 安装");
        return Ok(false);
    };

    let lock_path = extension_root.join("composer.lock");
    if lock_path.is_file() {
        std::fs::remove_file(&lock_path).map_err(|e| AppError::io("删除", &lock_path, e))?;
    }

    let _restore = scopeguard::guard(original, |bytes| {
        if let Err(e) = std::fs::write(&manifest_path, bytes) {
            log::warn!("恢复 {} 失败：{}", manifest_path.display(), e);
        }
    });

    let mut content = serde_json::to_string_pretty(&rewritten)?;
    content.push('\n');
    write_file(&manifest_path, content)?;

    log::info!("按平台 {} 的组件清单安装 composer 依赖", version);
    let spec = CommandSpec::new("composer")
        .args([
            "update",
            "--no-dev",
            "-n",
            "--no-scripts",
            "--optimize-autoloader",
        ])
        .cwd(extension_root);
    runner.run(ctx, &spec)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::testing::RecordingRunner;
    use proptest::prelude::*;
    use serde_json::json;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const MANIFEST: &str = r#"{
  "name": "acme/swag-example",
  "type": "platform-plugin",
  "require": {
    "platform/core": "~6.4",
    "acme/sdk": "^2.0"
  }
}
"#;

    #[test]
    fn test_needs_rewrite_boundary() {
        assert!(needs_rewrite(&Version::new(6, 4, 20, 2)));
        assert!(!needs_rewrite(&Version::new(6, 5, 0, 0)));
    }

    #[test]
    fn test_embedded_version_selection() {
        assert_eq!(embedded_version(&Version::new(6, 4, 18, 0)).unwrap(), "6.4.18.0");
        assert_eq!(embedded_version(&Version::new(6, 4, 19, 1)).unwrap(), "6.4.18.0");
        assert_eq!(embedded_version(&Version::new(6, 4, 25, 0)).unwrap(), "6.4.20.2");
        assert_eq!(embedded_version(&Version::new(6, 4, 0, 0)).unwrap(), "6.4.0.0");
        assert_eq!(embedded_version(&Version::new(6, 4, 1, 0)).unwrap(), "6.4.0.0");
        assert_eq!(embedded_version(&Version::new(6, 4, 12, 3)).unwrap(), "6.4.10.0");
        assert_eq!(embedded_version(&Version::new(6, 3, 5, 2)).unwrap(), "6.3.5.0");
        assert_eq!(embedded_version(&Version::new(6, 3, 0, 0)).unwrap(), "6.3.5.0");
    }

    #[test]
    fn test_every_embedded_version_has_all_components() {
        let versions: std::collections::BTreeSet<&str> =
            COMPONENT_MAPS.iter().map(|(v, _, _)| *v).collect();
        assert!(versions.len() >= 7);
        for version in versions {
            for (_, component) in PLATFORM_COMPONENTS {
                assert!(
                    COMPONENT_MAPS.iter().any(|(v, c, _)| *v == version && c == component),
                    "{}/{}",
                    version,
                    component
                );
            }
        }
    }

    #[test]
    fn test_every_embedded_map_parses() {
        for (version, component, _) in COMPONENT_MAPS {
            let map = component_map(&Version::parse(version).unwrap(), component).unwrap();
            assert!(!map.is_empty(), "{}/{}", version, component);
        }
    }

    #[test]
    fn test_rewrite_manifest_moves_platform_packages() {
        let manifest: Value = serde_json::from_str(MANIFEST).unwrap();
        let doc = rewrite_manifest(&manifest, &Version::new(6, 4, 18, 0), &["acme/internal".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(doc["require"], json!({"acme/sdk": "^2.0"}));
        assert_eq!(doc["provide"]["platform/core"], "*");
        assert_eq!(doc["replace"]["symfony/http-kernel"], "5.4.18");
        assert!(doc["replace"].get("scssphp/scssphp").is_none());
    }

    proptest! {
        #[test]
        fn prop_any_version_below_six_five_has_a_map(
            minor in 0u64..5,
            patch in 0u64..40,
            build in 0u64..10,
        ) {
            let version = Version::new(6, minor, patch, build);
            prop_assert!(needs_rewrite(&version));
            for (_, component) in PLATFORM_COMPONENTS {
                prop_assert!(component_map(&version, component).is_ok());
            }
        }
    }

    #[test]
    fn test_rewrite_manifest_empty_require_skips() {
        let manifest = json!({
            "name": "acme/only-core",
            "require": {"platform/core": "~6.4", "acme/internal": "*"}
        });
        let doc =
            rewrite_manifest(&manifest, &Version::new(6, 4, 18, 0), &["acme/internal".to_string()]).unwrap();
        assert!(doc.is_none());
    }

    #[test]
    fn test_install_restores_manifest_bytes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join(COMPOSER_FILE), MANIFEST).unwrap();
        fs::write(root.join("composer.lock"), "{}").unwrap();

        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let seen_in_hook = Arc::clone(&seen);
        let manifest_path = root.join(COMPOSER_FILE);
        let runner = RecordingRunner::with_hook(move |_| {
            let content = fs::read_to_string(&manifest_path).unwrap();
            *seen_in_hook.lock().unwrap() = Some(serde_json::from_str(&content).unwrap());
            Ok(String::new())
        });

        let ran = install_with_rewritten_manifest(
            &Context::new(),
            &runner,
            &root,
            &Version::new(6, 4, 18, 0),
            &[],
        )
        .unwrap();
        assert!(ran);

        let during = seen.lock().unwrap().clone().unwrap();
        assert_eq!(during["replace"]["twig/twig"], "3.4.3");
        assert!(during["require"].get("platform/core").is_none());

        assert_eq!(fs::read_to_string(root.join(COMPOSER_FILE)).unwrap(), MANIFEST);
        assert!(!root.join("composer.lock").exists());
        let call = &runner.calls_of("composer")[0];
        assert_eq!(call.args, vec!["update", "--no-dev", "-n", "--no-scripts", "--optimize-autoloader"]);
    }

    #[test]
    fn test_install_restores_manifest_on_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(COMPOSER_FILE), MANIFEST).unwrap();
        let runner = RecordingRunner::with_hook(|_| Err(AppError::tool("composer", "exit 1")));

        let result = install_with_rewritten_manifest(
            &Context::new(),
            &runner,
            dir.path(),
            &Version::new(6, 4, 18, 0),
            &[],
        );
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(dir.path().join(COMPOSER_FILE)).unwrap(), MANIFEST);
    }
}
