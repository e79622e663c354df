// ============================================================================
// App 类型扩展：解析 manifest.xml，发布时移除 setup/secret
// ============================================================================

use std::io::Cursor;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::utils::error::{AppError, AppResult};

/// App 清单文件名
pub const APP_MANIFEST_FILE: &str = "manifest.xml";

/// manifest 未声明兼容性时使用的默认约束
pub const DEFAULT_APP_COMPATIBILITY: &str = "~6.4";

/// manifest.xml 中与工具相关的字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppManifest {
    pub name: String,
    pub version: String,
    pub license: String,
    pub author: Option<String>,
    pub icon: Option<String>,
    pub compatibility: Option<String>,
    pub label: IndexMap<String, String>,
    pub description: IndexMap<String, String>,
    pub setup_secret: Option<String>,
}

/// 已加载的 App
#[derive(Debug, Clone, PartialEq)]
pub struct AppExtension {
    pub root: PathBuf,
    pub manifest: AppManifest,
}

impl AppExtension {
    pub fn load(root: &Path) -> AppResult<Self> {
        let path = root.join(APP_MANIFEST_FILE);
        let xml = std::fs::read_to_string(&path).map_err(|e| AppError::io("读取", &path, e))?;
        let manifest = parse_manifest(&xml)
            .map_err(|e| AppError::ValidationError(format!("{}：{}", path.display(), e)))?;
        if manifest.name.trim().is_empty() {
            return Err(AppError::ValidationError(format!(
                "{} 缺少 meta/name",
                path.display()
            )));
        }
        Ok(AppExtension {
            root: root.to_path_buf(),
            manifest,
        })
    }
}

/// 按元素路径收集 manifest 字段
pub fn parse_manifest(xml: &str) -> AppResult<AppManifest> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut manifest = AppManifest::default();
    let mut stack: Vec<String> = Vec::new();
    let mut lang: Option<String> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::ConfigError(format!(
                "manifest.xml 解析失败（位置 {}）：{}",
                reader.buffer_position(),
                e
            ))
        })?;

        let text = match event {
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.name().as_ref()).to_string());
                lang = e
                    .try_get_attribute("lang")
                    .ok()
                    .flatten()
                    .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()));
                continue;
            }
            Event::End(_) => {
                stack.pop();
                lang = None;
                continue;
            }
            Event::Text(t) => t
                .unescape()
                .map_err(|e| AppError::ConfigError(format!("manifest.xml 文本解码失败：{}", e)))?
                .to_string(),
            Event::CData(t) => String::from_utf8_lossy(&t).to_string(),
            Event::Eof => break,
            _ => continue,
        };

        let path = stack.join("/");
        let lang_key = lang.clone().unwrap_or_else(|| "en-GB".to_string());
        match path.as_str() {
            "manifest/meta/name" => manifest.name = text,
            "manifest/meta/version" => manifest.version = text,
            "manifest/meta/license" => manifest.license = text,
            "manifest/meta/author" => manifest.author = Some(text),
            "manifest/meta/icon" => manifest.icon = Some(text),
            "manifest/meta/compatibility" => manifest.compatibility = Some(text),
            "manifest/meta/label" => {
                manifest.label.insert(lang_key, text);
            }
            "manifest/meta/description" => {
                manifest.description.insert(lang_key, text);
            }
            "manifest/setup/secret" => manifest.setup_secret = Some(text),
            _ => {}
        }
    }

    Ok(manifest)
}

/// 移除 setup/secret 元素并以固定缩进重新输出
pub fn strip_setup_secret(xml: &str) -> AppResult<String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);

    let mut stack: Vec<String> = Vec::new();
    // 正在跳过的 secret 元素的嵌套深度
    let mut skipping = 0usize;

    loop {
        let event = reader.read_event().map_err(|e| {
            AppError::ConfigError(format!(
                "manifest.xml 解析失败（位置 {}）：{}",
                reader.buffer_position(),
                e
            ))
        })?;

        match &event {
            Event::Eof => break,
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if skipping > 0 {
                    skipping += 1;
                    continue;
                }
                if name == "secret" && stack.last().map(String::as_str) == Some("setup") {
                    skipping = 1;
                    continue;
                }
                stack.push(name);
            }
            Event::End(_) => {
                if skipping > 0 {
                    skipping -= 1;
                    continue;
                }
                stack.pop();
            }
            Event::Empty(e) => {
                if skipping > 0 {
                    continue;
                }
                if e.name().as_ref() == b"secret" && stack.last().map(String::as_str) == Some("setup")
                {
                    continue;
                }
            }
            _ => {
                if skipping > 0 {
                    continue;
                }
            }
        }

        writer
            .write_event(event)
            .map_err(|e| AppError::ConfigError(format!("manifest.xml 写入失败：{}", e)))?;
    }

    let mut out = String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| AppError::ConfigError(format!("manifest.xml 编码错误：{}", e)))?;
    out.push('\n');
    Ok(out)
}
