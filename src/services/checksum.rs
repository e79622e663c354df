// ============================================================================
// checksum.json：打包内容的 xxh128 校验清单
// ✅ 只能做：遍历文件、并行计算哈希、写入清单
// ============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_128;

use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::{to_slash, write_file};

pub const CHECKSUM_FILE: &str = "checksum.json";
pub const CHECKSUM_ALGORITHM: &str = "xxh128";
pub const CHECKSUM_FORMAT_VERSION: &str = "1.0.0";

/// 任意层级下都不参与校验的目录名
const IGNORED_DIR_NAMES: &[&str] = &["vendor", "node_modules"];

/// 管理后台编译产物：平台安装时会重新生成
const ADMIN_PUBLIC_TREE: &str = "Resources/public/administration";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChecksumManifest {
    pub algorithm: String,
    /// 相对路径 → 十六进制哈希，按路径排序
    pub hashes: BTreeMap<String, String>,
    pub version: String,
    #[serde(rename = "extensionVersion")]
    pub extension_version: String,
}

fn is_ignored(relative: &str, ignore: &[String]) -> bool {
    if relative == CHECKSUM_FILE {
        return true;
    }
    if relative.split('/').any(|part| IGNORED_DIR_NAMES.contains(&part)) {
        return true;
    }
    if relative == ADMIN_PUBLIC_TREE
        || relative.contains(&format!("{}/", ADMIN_PUBLIC_TREE))
        || relative.ends_with(&format!("/{}", ADMIN_PUBLIC_TREE))
    {
        return true;
    }
    ignore.iter().any(|pattern| {
        let pattern = pattern.trim_matches('/');
        !pattern.is_empty()
            && (relative == pattern || relative.starts_with(&format!("{}/", pattern)))
    })
}

/// 计算扩展目录下所有参与校验的文件哈希
///
/// # 参数
/// - `root`: 扩展根目录
/// - `extension_version`: 写入清单的扩展版本
/// - `ignore`: 额外忽略的相对路径（文件或目录）
pub fn generate_checksums(
    root: &Path,
    extension_version: &str,
    ignore: &[String],
) -> AppResult<ChecksumManifest> {
    let mut files: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| AppError::ArchiveError(format!("路径处理失败: {}", e)))?;
        let relative = to_slash(relative);
        if is_ignored(&relative, ignore) {
            continue;
        }
        files.push((relative, entry.path().to_path_buf()));
    }

    let hashes = files
        .par_iter()
        .map(|(relative, path)| {
            let content = std::fs::read(path).map_err(|e| AppError::io("读取文件", path, e))?;
            Ok((relative.clone(), format!("{:032x}", xxh3_128(&content))))
        })
        .collect::<AppResult<BTreeMap<String, String>>>()?;

    log::debug!("计算了 {} 个文件的校验值", hashes.len());
    Ok(ChecksumManifest {
        algorithm: CHECKSUM_ALGORITHM.to_string(),
        hashes,
        version: CHECKSUM_FORMAT_VERSION.to_string(),
        extension_version: extension_version.to_string(),
    })
}

/// 生成并写入 `<root>/checksum.json`
pub fn write_checksum_manifest(
    root: &Path,
    extension_version: &str,
    ignore: &[String],
) -> AppResult<ChecksumManifest> {
    let manifest = generate_checksums(root, extension_version, ignore)?;
    let mut json = serde_json::to_string_pretty(&manifest)?;
    json.push('\n');
    write_file(&root.join(CHECKSUM_FILE), json)?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for (rel, content) in [
            ("composer.json", "{}"),
            ("src/Plugin.php", "<?php"),
            ("src/Resources/public/administration/js/app.js", "x"),
            ("src/Resources/app/administration/node_modules/a/index.js", "x"),
            ("vendor/autoload.php", "<?php"),
            ("docs/readme.md", "doc"),
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_generate_checksums_skips_ignored_trees() {
        let dir = tree();
        let manifest = generate_checksums(dir.path(), "1.2.0", &["docs".to_string()]).unwrap();
        let keys: Vec<&str> = manifest.hashes.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["composer.json", "src/Plugin.php"]);
        assert_eq!(manifest.algorithm, "xxh128");
        assert_eq!(manifest.extension_version, "1.2.0");
        assert_eq!(
            manifest.hashes["composer.json"],
            format!("{:032x}", xxh3_128(b"{}"))
        );
        assert_eq!(manifest.hashes["composer.json"].len(), 32);
    }

    #[test]
    fn test_write_checksum_manifest_format() {
        let dir = tree();
        write_checksum_manifest(dir.path(), "1.2.0", &[]).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(CHECKSUM_FILE)).unwrap()).unwrap();
        assert_eq!(json["algorithm"], "xxh128");
        assert_eq!(json["version"], "1.0.0");
        assert_eq!(json["extensionVersion"], "1.2.0");
        assert!(json["hashes"].get("docs/readme.md").is_some());

        // 重新生成时不会把 checksum.json 自身计入
        let again = generate_checksums(dir.path(), "1.2.0", &[]).unwrap();
        assert!(!again.hashes.contains_key(CHECKSUM_FILE));
    }

    #[test]
    fn test_is_ignored_patterns() {
        let ignore = vec!["/build/".to_string()];
        assert!(is_ignored("build/app.js", &ignore));
        assert!(!is_ignored("builder/app.js", &ignore));
        assert!(is_ignored("src/vendor/x.php", &[]));
        assert!(!is_ignored("src/Resources/public/storefront/x.js", &[]));
    }
}
