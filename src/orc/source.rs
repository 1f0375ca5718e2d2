//! 数据源：文件 / 内存块
//!
//! 读取器按 `is_device_read_preferred` 的提示在"直接读入设备缓冲区"与
//! "主机读取后拷贝"之间选择。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::common::{EngineError, Result};
use crate::device::Stream;

pub trait DataSource: Send + Sync {
    fn size(&self) -> u64;

    fn host_read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// 直接读入设备内存，返回读取的字节数
    fn device_read(&self, _offset: u64, _dest: &mut [u8], _stream: &Stream) -> Result<usize> {
        Err(EngineError::Unsupported("device-direct reads".into()))
    }

    fn is_device_read_preferred(&self, _len: usize) -> bool { false }
}

fn check_range(offset: u64, len: usize, size: u64) -> Result<()> {
    if offset.checked_add(len as u64).map_or(true, |end| end > size) {
        return Err(EngineError::Decode(format!(
            "read of {len} bytes at {offset} past end of {size}-byte source"
        )));
    }
    Ok(())
}

// ── BufferSource ──────────────────────────────────────────────────────────────

/// 内存中的完整文件；大块读取走设备直读
#[derive(Debug, Clone)]
pub struct BufferSource {
    data:             Arc<[u8]>,
    direct_threshold: usize,
}

impl BufferSource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into(), direct_threshold: 128 * 1024 }
    }

    /// 超过该字节数的读取优先直读设备
    pub fn with_direct_threshold(mut self, bytes: usize) -> Self {
        self.direct_threshold = bytes; self
    }
}

impl DataSource for BufferSource {
    fn size(&self) -> u64 { self.data.len() as u64 }

    fn host_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len, self.size())?;
        let start = offset as usize;
        Ok(self.data[start..start + len].to_vec())
    }

    fn device_read(&self, offset: u64, dest: &mut [u8], stream: &Stream) -> Result<usize> {
        check_range(offset, dest.len(), self.size())?;
        let start = offset as usize;
        stream.launch("memcpy_h2d", || {
            dest.copy_from_slice(&self.data[start..start + dest.len()]);
            Ok(dest.len())
        })
    }

    fn is_device_read_preferred(&self, len: usize) -> bool { len >= self.direct_threshold }
}

// ── FileSource ────────────────────────────────────────────────────────────────

/// 本地文件；只支持主机读取
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();
        Ok(Self { file: Mutex::new(file), size })
    }
}

impl DataSource for FileSource {
    fn size(&self) -> u64 { self.size }

    fn host_read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len, self.size)?;
        let mut file = self.file.lock()
            .map_err(|_| EngineError::Device("file handle poisoned".into()))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
