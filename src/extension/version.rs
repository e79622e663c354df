// ============================================================================
// 平台版本号与版本约束
// 版本号为四段式（6.5.0.0），可带预发布后缀（-rc1 / -beta / -dev）
// 约束语法兼容包管理器常见写法：~ ^ .* 比较运算符、逗号/空格（与）、||（或）
// ============================================================================

use std::cmp::Ordering;
use std::fmt;

use crate::utils::error::{AppError, AppResult};

/// 四段式平台版本号
#[derive(Debug, Clone)]
pub struct Version {
    parts: [u64; 4],
    pre: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64, build: u64) -> Self {
        Version {
            parts: [major, minor, patch, build],
            pre: None,
        }
    }

    /// 解析版本号，缺失的段补 0，允许前缀 v
    pub fn parse(input: &str) -> AppResult<Self> {
        let raw = input.trim();
        let raw = raw.strip_prefix(&['v', 'V'][..]).unwrap_or(raw);
        // 构建元数据不参与比较
        let raw = raw.split('+').next().unwrap_or(raw);

        let (numbers, pre) = match raw.split_once('-') {
            Some((n, p)) => (n, Some(p.to_string())),
            None => (raw, None),
        };

        if numbers.is_empty() {
            return Err(AppError::VersionError(format!("无法解析版本号：{}", input)));
        }

        let mut parts = [0u64; 4];
        let segments: Vec<&str> = numbers.split('.').collect();
        if segments.len() > 4 {
            return Err(AppError::VersionError(format!("版本号段数过多：{}", input)));
        }
        for (i, seg) in segments.iter().enumerate() {
            parts[i] = seg
                .parse::<u64>()
                .map_err(|_| AppError::VersionError(format!("无法解析版本号：{}", input)))?;
        }

        let pre = pre.filter(|p| !p.is_empty());
        Ok(Version { parts, pre })
    }

    pub fn major(&self) -> u64 {
        self.parts[0]
    }

    pub fn minor(&self) -> u64 {
        self.parts[1]
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    pub fn pre(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    /// 同样的数字段，但带最低的 dev 稳定性（用作排他上界）
    fn lowest_of(parts: [u64; 4]) -> Self {
        Version {
            parts,
            pre: Some("dev".to_string()),
        }
    }
}

/// 预发布后缀排序：dev < alpha < beta < rc，数字后缀再比较
fn pre_rank(pre: &str) -> (u8, u64) {
    let lower = pre.to_ascii_lowercase();
    let (rank, rest) = if let Some(rest) = lower.strip_prefix("dev") {
        (0, rest)
    } else if let Some(rest) = lower.strip_prefix("alpha") {
        (1, rest)
    } else if let Some(rest) = lower.strip_prefix("beta") {
        (2, rest)
    } else if let Some(rest) = lower.strip_prefix("rc") {
        (3, rest)
    } else {
        (0, lower.as_str())
    };
    let num = rest
        .trim_start_matches(&['.', '-'][..])
        .parse::<u64>()
        .unwrap_or(0);
    (rank, num)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts
            .cmp(&other.parts)
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => pre_rank(a).cmp(&pre_rank(b)),
            })
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.parts;
        write!(f, "{}.{}.{}.{}", a, b, c, d)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

// ============================================================================
// 版本约束
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    op: Op,
    version: Version,
}

impl Bound {
    fn matches(&self, v: &Version) -> bool {
        match self.op {
            Op::Eq => v == &self.version,
            Op::Ne => v != &self.version,
            Op::Gt => v > &self.version,
            Op::Ge => v >= &self.version,
            Op::Lt => v < &self.version,
            Op::Le => v <= &self.version,
        }
    }
}

/// 版本约束：多个“或”分组，每组内所有边界都要满足
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    raw: String,
    groups: Vec<Vec<Bound>>,
}

impl Constraint {
    pub fn parse(input: &str) -> AppResult<Self> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(AppError::VersionError("版本约束不能为空".to_string()));
        }

        let mut groups = Vec::new();
        for group in raw.split('|').map(str::trim).filter(|g| !g.is_empty()) {
            groups.push(parse_group(group, input)?);
        }
        if groups.is_empty() {
            return Err(AppError::VersionError(format!("无法解析版本约束：{}", input)));
        }

        Ok(Constraint {
            raw: raw.to_string(),
            groups,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|b| b.matches(version)))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_group(group: &str, original: &str) -> AppResult<Vec<Bound>> {
    // 连字符区间：6.4 - 6.5
    if let Some((from, to)) = group.split_once(" - ") {
        let from = Version::parse(from)?;
        let (to_parts, len) = parse_partial(to.trim(), original)?;
        let upper = bump(&to_parts, len);
        let mut bounds = vec![Bound { op: Op::Ge, version: from }];
        if len < 4 {
            bounds.push(Bound { op: Op::Lt, version: upper });
        } else {
            bounds.push(Bound {
                op: Op::Le,
                version: Version::parse(to)?,
            });
        }
        return Ok(bounds);
    }

    // 运算符与版本号之间允许空格：">= 6.4"
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for token in group
        .split(&[',', ' '][..])
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        if matches!(token, ">=" | "<=" | ">" | "<" | "!=" | "=" | "==") {
            pending_op = Some(token.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{}{}", op, token)),
            None => tokens.push(token.to_string()),
        }
    }

    let mut bounds = Vec::new();
    for token in tokens {
        bounds.extend(parse_token(&token, original)?);
    }
    Ok(bounds)
}

fn parse_token(token: &str, original: &str) -> AppResult<Vec<Bound>> {
    // 稳定性标记不影响区间
    let token = token.split('@').next().unwrap_or(token);
    if token.is_empty() || token == "*" {
        return Ok(Vec::new());
    }

    for (prefix, op) in [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ] {
        if let Some(rest) = token.strip_prefix(prefix) {
            let version = Version::parse(rest)?;
            // 与 "<7.0" 等价于 "<7.0.0.0-dev"：排除 7.0 的预发布版本
            let version = if op == Op::Lt && version.pre.is_none() {
                Version::lowest_of(version.parts)
            } else {
                version
            };
            return Ok(vec![Bound { op, version }]);
        }
    }

    if let Some(rest) = token.strip_prefix('~') {
        let (parts, len) = parse_partial(rest, original)?;
        let upper_len = if len == 1 { 1 } else { len - 1 };
        return Ok(vec![
            Bound {
                op: Op::Ge,
                version: Version { parts, pre: None },
            },
            Bound {
                op: Op::Lt,
                version: bump(&parts, upper_len),
            },
        ]);
    }

    if let Some(rest) = token.strip_prefix('^') {
        let (parts, len) = parse_partial(rest, original)?;
        // 第一个非零段决定上界
        let significant = parts
            .iter()
            .take(len)
            .position(|&p| p != 0)
            .unwrap_or(len.saturating_sub(1));
        return Ok(vec![
            Bound {
                op: Op::Ge,
                version: Version { parts, pre: None },
            },
            Bound {
                op: Op::Lt,
                version: bump(&parts, significant + 1),
            },
        ]);
    }

    if token.ends_with(".*") || token.ends_with(".x") || token.ends_with(".X") {
        let base = &token[..token.len() - 2];
        let (parts, len) = parse_partial(base, original)?;
        return Ok(vec![
            Bound {
                op: Op::Ge,
                version: Version { parts, pre: None },
            },
            Bound {
                op: Op::Lt,
                version: bump(&parts, len),
            },
        ]);
    }

    Ok(vec![Bound {
        op: Op::Eq,
        version: Version::parse(token)?,
    }])
}

/// 解析不完整的数字版本，返回补齐后的四段及原始段数
fn parse_partial(input: &str, original: &str) -> AppResult<([u64; 4], usize)> {
    let input = input.trim().trim_start_matches(&['v', 'V'][..]);
    let input = input.split('-').next().unwrap_or(input);
    let segments: Vec<&str> = input.split('.').collect();
    if segments.is_empty() || segments.len() > 4 {
        return Err(AppError::VersionError(format!("无法解析版本约束：{}", original)));
    }
    let mut parts = [0u64; 4];
    for (i, seg) in segments.iter().enumerate() {
        parts[i] = seg
            .parse::<u64>()
            .map_err(|_| AppError::VersionError(format!("无法解析版本约束：{}", original)))?;
    }
    Ok((parts, segments.len()))
}

/// 保留前 len 段并把第 len 段加一，其余清零，带 dev 稳定性作为排他上界
fn bump(parts: &[u64; 4], len: usize) -> Version {
    let len = len.clamp(1, 4);
    let mut next = [0u64; 4];
    next[..len].copy_from_slice(&parts[..len]);
    next[len - 1] += 1;
    Version::lowest_of(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> Constraint {
        Constraint::parse(s).unwrap()
    }

    #[test]
    fn test_parse_pads_missing_segments() {
        assert_eq!(v("6.5"), Version::new(6, 5, 0, 0));
        assert_eq!(v("v6.5.1.0").to_string(), "6.5.1.0");
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("6.5.1.0-rc1") < v("6.5.1.0"));
        assert!(v("6.5.1.0-rc1") > v("6.5.0.0"));
        assert!(v("6.5.0.0-beta") < v("6.5.0.0-rc1"));
        assert!(v("6.5.0.0-rc1") < v("6.5.0.0-rc2"));
        assert!(v("6.5.0.0-dev") < v("6.5.0.0-alpha"));
    }

    #[test]
    fn test_invalid_version() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("six").is_err());
        assert!(Version::parse("1.2.3.4.5").is_err());
    }

    #[test]
    fn test_tilde_two_segments() {
        let cons = c("~6.5");
        assert!(cons.matches(&v("6.5.0.0")));
        assert!(cons.matches(&v("6.6.0.0")));
        assert!(!cons.matches(&v("6.4.20.0")));
        assert!(!cons.matches(&v("7.0.0.0")));
        assert!(!cons.matches(&v("7.0.0.0-rc1")));
    }

    #[test]
    fn test_tilde_three_segments() {
        let cons = c("~6.4.5");
        assert!(cons.matches(&v("6.4.5.0")));
        assert!(cons.matches(&v("6.4.20.2")));
        assert!(!cons.matches(&v("6.5.0.0")));
    }

    #[test]
    fn test_caret() {
        let cons = c("^6.4");
        assert!(cons.matches(&v("6.4.0.0")));
        assert!(cons.matches(&v("6.6.1.0")));
        assert!(!cons.matches(&v("7.0.0.0")));
    }

    #[test]
    fn test_wildcard() {
        let cons = c("6.5.*");
        assert!(cons.matches(&v("6.5.8.3")));
        assert!(!cons.matches(&v("6.6.0.0")));
        assert!(c("*").matches(&v("1.0.0.0")));
    }

    #[test]
    fn test_range_and_or() {
        let cons = c(">=6.4.0.0 <6.5");
        assert!(cons.matches(&v("6.4.18.0")));
        assert!(!cons.matches(&v("6.5.0.0")));

        let cons = c(">= 6.4, < 6.5");
        assert!(cons.matches(&v("6.4.1.0")));

        let cons = c("~6.4.0 || ~6.6.0");
        assert!(cons.matches(&v("6.4.3.0")));
        assert!(!cons.matches(&v("6.5.0.0")));
        assert!(cons.matches(&v("6.6.0.0")));
    }

    #[test]
    fn test_hyphen_range() {
        let cons = c("6.4 - 6.5");
        assert!(cons.matches(&v("6.4.0.0")));
        assert!(cons.matches(&v("6.5.9.0")));
        assert!(!cons.matches(&v("6.6.0.0")));
    }

    #[test]
    fn test_exact_and_stability_flag() {
        assert!(c("6.5.0.0").matches(&v("6.5.0.0")));
        assert!(!c("6.5.0.0").matches(&v("6.5.0.1")));
        assert!(c("~6.5@dev").matches(&v("6.5.2.0")));
    }

    #[test]
    fn test_invalid_constraint() {
        assert!(Constraint::parse("").is_err());
        assert!(Constraint::parse("~abc").is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// 版本号的字符串表示可以被重新解析为同一个版本
        #[test]
        fn prop_version_display_reparses(a in 0u64..20, b in 0u64..20, c in 0u64..50, d in 0u64..50) {
            let version = Version::new(a, b, c, d);
            prop_assert_eq!(Version::parse(&version.to_string()).unwrap(), version);
        }

        /// ~X.Y 总是包含 X.Y.0.0 且不包含 (X+1).0.0.0
        #[test]
        fn prop_tilde_bounds(a in 1u64..20, b in 0u64..20) {
            let cons = Constraint::parse(&format!("~{}.{}", a, b)).unwrap();
            prop_assert!(cons.matches(&Version::new(a, b, 0, 0)));
            prop_assert!(!cons.matches(&Version::new(a + 1, 0, 0, 0)));
        }
    }
}
