// ============================================================================
// 扩展变更日志（CHANGELOG_en-GB.md / CHANGELOG.md）解析
// ============================================================================

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::utils::error::{AppError, AppResult};

/// 变更日志文件候选名，第一个为规范文件名
pub const CHANGELOG_FILES: &[&str] = &["CHANGELOG_en-GB.md", "CHANGELOG.md"];

/// 版本 → 条目列表，保持文件中的顺序（通常是最新版本在前）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtensionChangelog {
    pub path: PathBuf,
    pub versions: IndexMap<String, Vec<String>>,
}

impl ExtensionChangelog {
    pub fn load(root: &Path) -> AppResult<Option<Self>> {
        let Some(path) = CHANGELOG_FILES
            .iter()
            .map(|name| root.join(name))
            .find(|p| p.is_file())
        else {
            return Ok(None);
        };

        let content =
            std::fs::read_to_string(&path).map_err(|e| AppError::io("读取变更日志", &path, e))?;
        let mut changelog = parse_changelog(&content);
        changelog.path = path;
        Ok(Some(changelog))
    }

    pub fn entries_for(&self, version: &str) -> Option<&[String]> {
        self.versions.get(version).map(Vec::as_slice)
    }
}

/// 以一级标题（# 1.0.0）划分版本，其余非空行作为条目
pub fn parse_changelog(content: &str) -> ExtensionChangelog {
    let mut versions: IndexMap<String, Vec<String>> = IndexMap::new();
    let mut current: Option<String> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix('#') {
            if !heading.starts_with('#') {
                let version = heading.trim().to_string();
                versions.entry(version.clone()).or_default();
                current = Some(version);
                continue;
            }
        }
        if trimmed.is_empty() {
            continue;
        }
        if let Some(version) = &current {
            let entry = trimmed
                .trim_start_matches(&['-', '*'][..])
                .trim()
                .to_string();
            if let Some(list) = versions.get_mut(version) {
                list.push(entry);
            }
        }
    }

    ExtensionChangelog {
        path: PathBuf::new(),
        versions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_changelog_versions_in_order() {
        let log = parse_changelog("# 1.1.0\n- Fixed bug\n* Added thing\n\n# 1.0.0\n- Initial release\n");
        let keys: Vec<&String> = log.versions.keys().collect();
        assert_eq!(keys, vec!["1.1.0", "1.0.0"]);
        assert_eq!(
            log.entries_for("1.1.0").unwrap(),
            &["Fixed bug".to_string(), "Added thing".to_string()]
        );
        assert!(log.entries_for("2.0.0").is_none());
    }

    #[test]
    fn test_second_level_headings_are_entries() {
        let log = parse_changelog("# 1.0.0\n## Notes\n- a\n");
        assert_eq!(log.entries_for("1.0.0").unwrap().len(), 2);
    }

    #[test]
    fn test_load_prefers_canonical_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("CHANGELOG.md"), "# 0.9.0\n- old\n").unwrap();
        fs::write(dir.path().join("CHANGELOG_en-GB.md"), "# 1.0.0\n- new\n").unwrap();
        let log = ExtensionChangelog::load(dir.path()).unwrap().unwrap();
        assert!(log.entries_for("1.0.0").is_some());
        assert!(log.path.ends_with("CHANGELOG_en-GB.md"));
    }

    #[test]
    fn test_load_missing_changelog() {
        let dir = TempDir::new().unwrap();
        assert!(ExtensionChangelog::load(dir.path()).unwrap().is_none());
    }
}
