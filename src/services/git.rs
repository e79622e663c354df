// ============================================================================
// Git 交互：按 ref 导出源码、读取最新 tag 与提交记录
// ✅ 只能做：拼装 git 命令、解析输出
// ============================================================================

use std::path::Path;

use crate::utils::context::Context;
use crate::utils::error::AppResult;
use crate::utils::process::{CommandSpec, ProcessRunner};

/// 一条提交记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub message: String,
}

fn git(repo: &Path) -> CommandSpec {
    CommandSpec::new("git").cwd(repo)
}

/// `git archive` 导出指定 ref 的内容为 ZIP
pub fn archive_ref(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    repo: &Path,
    git_ref: &str,
    zip_path: &Path,
) -> AppResult<()> {
    log::info!("导出 {} 的 {} 版本", repo.display(), git_ref);
    let spec = git(repo).args([
        "archive".to_string(),
        "--format=zip".to_string(),
        format!("--output={}", zip_path.to_string_lossy()),
        git_ref.to_string(),
    ]);
    runner.run(ctx, &spec)?;
    Ok(())
}

/// 最新创建的 tag；仓库没有 tag 时退回当前分支名
pub fn latest_tag(ctx: &Context, runner: &dyn ProcessRunner, repo: &Path) -> AppResult<String> {
    let spec = git(repo).args([
        "for-each-ref",
        "--sort=-creatordate",
        "--format=%(refname:short)",
        "--count=1",
        "refs/tags",
    ]);
    let tag = runner.run(ctx, &spec)?;
    let tag = tag.trim();
    if !tag.is_empty() {
        return Ok(tag.to_string());
    }

    let branch = runner.run(ctx, &git(repo).args(["rev-parse", "--abbrev-ref", "HEAD"]))?;
    Ok(branch.trim().to_string())
}

/// `git_ref` 之前的上一个 tag，不存在时返回 None
pub fn previous_tag(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    repo: &Path,
    git_ref: &str,
) -> Option<String> {
    let spec = git(repo).args([
        "describe".to_string(),
        "--tags".to_string(),
        "--abbrev=0".to_string(),
        format!("{}^", git_ref),
    ]);
    match runner.run(ctx, &spec) {
        Ok(out) => Some(out.trim().to_string()).filter(|t| !t.is_empty()),
        Err(e) => {
            log::debug!("{} 之前没有 tag：{}", git_ref, e);
            None
        }
    }
}

/// `from..to` 之间的提交；`from` 为空时取 `to` 的全部历史
pub fn commits_between(
    ctx: &Context,
    runner: &dyn ProcessRunner,
    repo: &Path,
    from: Option<&str>,
    to: &str,
) -> AppResult<Vec<Commit>> {
    let range = match from {
        Some(from) => format!("{}..{}", from, to),
        None => to.to_string(),
    };
    let out = runner.run(
        ctx,
        &git(repo).args(["log".to_string(), "--format=%H%x09%s".to_string(), range]),
    )?;
    Ok(parse_log(&out))
}

/// 解析 `%H\t%s` 格式的 git log 输出
pub fn parse_log(output: &str) -> Vec<Commit> {
    output
        .lines()
        .filter_map(|line| {
            let (hash, message) = line.split_once('\t')?;
            let hash = hash.trim();
            if hash.is_empty() {
                return None;
            }
            Some(Commit {
                hash: hash.to_string(),
                message: message.trim().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AppError;
    use crate::utils::process::testing::RecordingRunner;

    #[test]
    fn test_parse_log() {
        let commits = parse_log("abc123\tNEXT-1 - Fix cart\n\ndef456\tchore: bump\nbroken line\n");
        assert_eq!(
            commits,
            vec![
                Commit { hash: "abc123".into(), message: "NEXT-1 - Fix cart".into() },
                Commit { hash: "def456".into(), message: "chore: bump".into() },
            ]
        );
    }

    #[test]
    fn test_latest_tag_falls_back_to_branch() {
        let runner = RecordingRunner::with_hook(|spec| {
            if spec.args[0] == "for-each-ref" {
                Ok("\n".to_string())
            } else {
                Ok("main\n".to_string())
            }
        });
        let tag = latest_tag(&Context::new(), &runner, Path::new("/repo")).unwrap();
        assert_eq!(tag, "main");
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_latest_tag_prefers_tag() {
        let runner = RecordingRunner::with_hook(|_| Ok("v1.2.0\n".to_string()));
        let tag = latest_tag(&Context::new(), &runner, Path::new("/repo")).unwrap();
        assert_eq!(tag, "v1.2.0");
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_previous_tag_none_on_failure() {
        let runner = RecordingRunner::with_hook(|_| Err(AppError::tool("git", "no names found")));
        assert_eq!(previous_tag(&Context::new(), &runner, Path::new("/repo"), "v1.0.0"), None);
    }

    #[test]
    fn test_commits_between_range() {
        let runner = RecordingRunner::new();
        commits_between(&Context::new(), &runner, Path::new("/repo"), Some("v1.0.0"), "v1.1.0").unwrap();
        assert_eq!(runner.calls()[0].args[2], "v1.0.0..v1.1.0");
    }
}
