// ============================================================================
// 归档工具：目录复制、确定性 ZIP 打包与安全解包
// ✅ 只能做：文件树 ↔ ZIP 的双向转换，保留权限位与修改时间
// ⛔ 禁止：在这里决定哪些文件该进包（由 packer 负责过滤）
// ============================================================================

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::utils::error::{AppError, AppResult};
use crate::utils::fs::to_slash;

/// 没有权限信息时使用的默认文件权限
const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// 递归复制目录，跳过符号链接
pub fn copy_tree(src: &Path, dst: &Path) -> AppResult<()> {
    std::fs::create_dir_all(dst).map_err(|e| AppError::io("创建目录", dst, e))?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::ArchiveError(format!("路径处理失败: {}", e)))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        if entry.path_is_symlink() {
            log::debug!("跳过符号链接 {}", entry.path().display());
            continue;
        }

        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| AppError::io("创建目录", &target, e))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| AppError::io("创建目录", parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| AppError::io("复制文件", entry.path(), e))?;
        }
    }
    Ok(())
}

/// 将目录打包为 ZIP
///
/// 条目按路径排序写入，文件权限与修改时间原样保留，
/// 同样的输入树两次打包得到的条目顺序和内容一致。
///
/// # 参数
/// - `src_dir`: 待打包的目录
/// - `zip_path`: 输出文件
/// - `prefix`: ZIP 内的顶层目录名（为空时直接放在根下）
///
/// # 返回
/// 写入的文件条目数（不含目录）
pub fn create_zip_from_dir(src_dir: &Path, zip_path: &Path, prefix: Option<&str>) -> AppResult<usize> {
    if let Some(parent) = zip_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| AppError::io("创建目录", parent, e))?;
    }
    let file = File::create(zip_path).map_err(|e| AppError::io("创建 ZIP 文件", zip_path, e))?;
    let mut zip_writer = ZipWriter::new(file);

    let mut entries = Vec::new();
    for entry in WalkDir::new(src_dir).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if entry.path_is_symlink() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| AppError::ArchiveError(format!("路径处理失败: {}", e)))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        let mut name = to_slash(relative);
        if is_dir {
            name.push('/');
        }
        entries.push((name, entry.path().to_path_buf(), is_dir));
    }
    // 按最终条目名排序，目录名带末尾斜杠
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some(prefix) = prefix {
        let options = entry_options(src_dir, true)?;
        zip_writer
            .add_directory(format!("{}/", prefix), options)
            .map_err(|e| AppError::ArchiveError(format!("添加目录失败: {}", e)))?;
    }

    let mut file_count = 0;
    for (name, path, is_dir) in entries {
        let zip_entry_name = match prefix {
            Some(prefix) => format!("{}/{}", prefix, name),
            None => name,
        };
        let options = entry_options(&path, is_dir)?;

        if is_dir {
            zip_writer
                .add_directory(zip_entry_name.as_str(), options)
                .map_err(|e| AppError::ArchiveError(format!("添加目录失败: {}", e)))?;
            continue;
        }

        zip_writer
            .start_file(zip_entry_name.as_str(), options)
            .map_err(|e| AppError::ArchiveError(format!("添加文件失败: {}", e)))?;
        // 分块读取，避免大文件一次性加载到内存
        let mut file = File::open(&path).map_err(|e| AppError::io("读取文件", &path, e))?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(|e| AppError::io("读取文件", &path, e))?;
            if n == 0 {
                break;
            }
            zip_writer
                .write_all(&buf[..n])
                .map_err(|e| AppError::io("写入 ZIP", zip_path, e))?;
        }
        file_count += 1;
    }

    zip_writer
        .finish()
        .map_err(|e| AppError::ArchiveError(format!("完成写入失败: {}", e)))?;
    Ok(file_count)
}

fn entry_options(path: &Path, is_dir: bool) -> AppResult<SimpleFileOptions> {
    let metadata = std::fs::metadata(path).map_err(|e| AppError::io("读取元数据", path, e))?;
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(file_mode(&metadata, is_dir));
    if let Some(modified) = metadata.modified().ok().and_then(zip_time) {
        options = options.last_modified_time(modified);
    }
    Ok(options)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata, _is_dir: bool) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata, is_dir: bool) -> u32 {
    if is_dir {
        DEFAULT_DIR_MODE
    } else {
        DEFAULT_FILE_MODE
    }
}

/// SystemTime → ZIP 时间戳（UTC，超出 1980-2107 范围时放弃）
fn zip_time(time: SystemTime) -> Option<DateTime> {
    let t = OffsetDateTime::from(time);
    let year = u16::try_from(t.year()).ok()?;
    DateTime::from_date_and_time(year, t.month() as u8, t.day(), t.hour(), t.minute(), t.second()).ok()
}

/// ZIP 时间戳 → SystemTime（按 UTC 解释）
fn system_time(dt: &DateTime) -> Option<SystemTime> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(i32::from(dt.year()), month, dt.day()).ok()?;
    let time = Time::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(SystemTime::from(PrimitiveDateTime::new(date, time).assume_utc()))
}

/// 检查条目名是否会逃逸出解包目录
fn safe_entry_path(dest: &Path, name: &str) -> AppResult<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative.is_absolute()
        || relative.components().any(|c| {
            matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
        });
    if escapes {
        return Err(AppError::ArchiveError(format!(
            "ZIP 条目 {} 指向解包目录之外",
            name
        )));
    }
    let target = dest.join(relative);
    if !target.starts_with(dest) {
        return Err(AppError::ArchiveError(format!(
            "ZIP 条目 {} 指向解包目录之外",
            name
        )));
    }
    Ok(target)
}

/// 解包 ZIP 到目标目录，恢复权限位与修改时间
///
/// 任何路径越界的条目都会让整个解包失败。
pub fn extract_zip(zip_path: &Path, dest: &Path) -> AppResult<usize> {
    let file = File::open(zip_path).map_err(|e| AppError::io("打开 ZIP 文件", zip_path, e))?;
    let mut archive = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest).map_err(|e| AppError::io("创建目录", dest, e))?;

    let mut file_count = 0;
    let mut dir_times = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let target = safe_entry_path(dest, entry.name())?;
        let mode = entry.unix_mode();
        let modified = entry.last_modified().and_then(|dt| system_time(&dt));

        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| AppError::io("创建目录", &target, e))?;
            apply_mode(&target, mode.unwrap_or(DEFAULT_DIR_MODE))?;
            if let Some(modified) = modified {
                dir_times.push((target, modified));
            }
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io("创建目录", parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| AppError::io("写入文件", &target, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| AppError::io("写入文件", &target, e))?;
        if let Some(modified) = modified {
            out.set_modified(modified)
                .map_err(|e| AppError::io("设置修改时间", &target, e))?;
        }
        drop(out);
        apply_mode(&target, mode.unwrap_or(DEFAULT_FILE_MODE))?;
        file_count += 1;
    }

    // 目录时间在其内容写完后再设置，否则会被后续写入覆盖
    for (dir, modified) in dir_times {
        if let Ok(handle) = File::open(&dir) {
            let _ = handle.set_modified(modified);
        }
    }
    Ok(file_count)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> AppResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .map_err(|e| AppError::io("设置权限", path, e))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> AppResult<()> {
    Ok(())
}

/// 列出 ZIP 中的条目名（按写入顺序）
pub fn list_entries(zip_path: &Path) -> AppResult<Vec<String>> {
    let file = File::open(zip_path).map_err(|e| AppError::io("打开 ZIP 文件", zip_path, e))?;
    let archive = ZipArchive::new(file)?;
    Ok(archive.file_names().map(str::to_string).collect::<Vec<_>>())
}
