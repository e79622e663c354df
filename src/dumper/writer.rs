// ============================================================================
// 导出流的压缩包装：不压缩 / gzip / zstd
// ============================================================================

use std::io::{self, Write};
use std::str::FromStr;

use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use crate::utils::error::{AppError, AppResult};

/// zstd 默认压缩级别
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl FromStr for Compression {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(AppError::ValidationError(format!(
                "不支持的压缩方式：{}（可选 gzip、zstd）",
                other
            ))),
        }
    }
}

impl Compression {
    /// 输出文件的默认扩展名
    pub fn file_extension(&self) -> &'static str {
        match self {
            Compression::None => "sql",
            Compression::Gzip => "sql.gz",
            Compression::Zstd => "sql.zst",
        }
    }
}

/// 按压缩方式包装底层 writer，结束时必须调用 [`DumpWriter::finish`]
pub enum DumpWriter<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(zstd::Encoder<'static, W>),
}

impl<W: Write> DumpWriter<W> {
    pub fn new(inner: W, compression: Compression) -> AppResult<Self> {
        Ok(match compression {
            Compression::None => DumpWriter::Plain(inner),
            Compression::Gzip => DumpWriter::Gzip(GzEncoder::new(inner, GzLevel::default())),
            Compression::Zstd => DumpWriter::Zstd(zstd::Encoder::new(inner, ZSTD_LEVEL)?),
        })
    }

    /// 写出压缩尾部并返回底层 writer
    pub fn finish(self) -> AppResult<W> {
        let mut inner = match self {
            DumpWriter::Plain(w) => w,
            DumpWriter::Gzip(encoder) => encoder.finish()?,
            DumpWriter::Zstd(encoder) => encoder.finish()?,
        };
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for DumpWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            DumpWriter::Plain(w) => w.write(buf),
            DumpWriter::Gzip(w) => w.write(buf),
            DumpWriter::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            DumpWriter::Plain(w) => w.flush(),
            DumpWriter::Gzip(w) => w.flush(),
            DumpWriter::Zstd(w) => w.flush(),
        }
    }
}
