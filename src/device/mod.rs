//! 设备执行模型（主机模拟）
//!
//! 每次调用只使用一条逻辑 `Stream`，kernel 按提交顺序执行；
//! 主机需要设备侧结果（块数、子行数、匹配数…）时显式 `download`，
//! 这是阻塞往返，不做轮询。
//!
//! ```text
//!   upload(config) ──▶ launch(kernel) ──▶ download(result) ──▶ 主机决策
//! ```
//!
//! 设备内存来自调用方提供的 [`MemoryResource`]；临时缓冲区 [`DeviceBuffer`]
//! 在 drop 时归还字节数，不跨调用保留。

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::common::{EngineError, Result};

// ── MemoryResource ────────────────────────────────────────────────────────────

/// 调用方提供的设备分配器
pub trait MemoryResource: Send + Sync + fmt::Debug {
    fn allocate(&self, bytes: usize) -> Result<()>;
    fn deallocate(&self, bytes: usize);
    fn bytes_in_use(&self) -> usize;
}

/// 只记账的默认分配器；可设置上限
#[derive(Debug, Default)]
pub struct DefaultMemoryResource {
    in_use: AtomicUsize,
    peak:   AtomicUsize,
    limit:  Option<usize>,
}

impl DefaultMemoryResource {
    pub fn new() -> Self { Self::default() }

    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    pub fn peak_bytes(&self) -> usize { self.peak.load(Ordering::Relaxed) }
}

impl MemoryResource for DefaultMemoryResource {
    fn allocate(&self, bytes: usize) -> Result<()> {
        let prev = self.in_use.fetch_add(bytes, Ordering::AcqRel);
        if let Some(limit) = self.limit {
            if prev + bytes > limit {
                self.in_use.fetch_sub(bytes, Ordering::AcqRel);
                return Err(EngineError::OutOfMemory {
                    requested: bytes,
                    available: limit.saturating_sub(prev),
                });
            }
        }
        self.peak.fetch_max(prev + bytes, Ordering::Relaxed);
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn bytes_in_use(&self) -> usize { self.in_use.load(Ordering::Acquire) }
}

// ── DeviceBuffer ──────────────────────────────────────────────────────────────

/// 设备侧临时缓冲区
pub struct DeviceBuffer<T> {
    data:  Vec<T>,
    bytes: usize,
    mr:    Arc<dyn MemoryResource>,
}

impl<T> DeviceBuffer<T> {
    pub fn len(&self)      -> usize { self.data.len() }
    pub fn is_empty(&self) -> bool  { self.data.is_empty() }

    /// 转交给输出列；字节数随之归还给分配器
    pub fn into_vec(mut self) -> Vec<T> {
        std::mem::take(&mut self.data)
    }
}

impl<T> Deref for DeviceBuffer<T> {
    type Target = [T];
    fn deref(&self) -> &[T] { &self.data }
}

impl<T> DerefMut for DeviceBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] { &mut self.data }
}

impl<T> Drop for DeviceBuffer<T> {
    fn drop(&mut self) {
        self.mr.deallocate(self.bytes);
    }
}

impl<T: fmt::Debug> fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer").field("len", &self.data.len()).field("bytes", &self.bytes).finish()
    }
}

// ── Stream ────────────────────────────────────────────────────────────────────

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

/// 一条有序执行流
#[derive(Clone, Debug)]
pub struct Stream {
    id:       u64,
    mr:       Arc<dyn MemoryResource>,
    launches: Arc<AtomicU64>,
}

impl Default for Stream {
    fn default() -> Self { Self::new(Arc::new(DefaultMemoryResource::new())) }
}

impl Stream {
    pub fn new(mr: Arc<dyn MemoryResource>) -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            mr,
            launches: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> u64 { self.id }
    pub fn memory_resource(&self) -> &Arc<dyn MemoryResource> { &self.mr }
    pub fn kernel_launches(&self) -> u64 { self.launches.load(Ordering::Relaxed) }

    /// 分配 `len` 个默认值元素
    pub fn alloc<T: Clone + Default>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        let bytes = len * std::mem::size_of::<T>();
        self.mr.allocate(bytes)?;
        Ok(DeviceBuffer { data: vec![T::default(); len], bytes, mr: Arc::clone(&self.mr) })
    }

    /// 主机 → 设备
    pub fn upload<T: Clone>(&self, host: &[T]) -> Result<DeviceBuffer<T>> {
        let bytes = std::mem::size_of_val(host);
        self.mr.allocate(bytes)?;
        trace!(stream = self.id, bytes, "upload");
        Ok(DeviceBuffer { data: host.to_vec(), bytes, mr: Arc::clone(&self.mr) })
    }

    /// 接管已在设备侧生成的数据
    pub fn adopt<T>(&self, data: Vec<T>) -> Result<DeviceBuffer<T>> {
        let bytes = data.len() * std::mem::size_of::<T>();
        self.mr.allocate(bytes)?;
        Ok(DeviceBuffer { data, bytes, mr: Arc::clone(&self.mr) })
    }

    /// 设备 → 主机（阻塞）
    pub fn download<T: Clone>(&self, buf: &DeviceBuffer<T>) -> Vec<T> {
        trace!(stream = self.id, len = buf.len(), "download");
        buf.data.clone()
    }

    /// 提交一个 kernel；按提交顺序同步执行
    pub fn launch<R>(&self, kernel: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let n = self.launches.fetch_add(1, Ordering::Relaxed);
        trace!(stream = self.id, launch = n, kernel, "launch");
        f().map_err(|e| {
            debug!(stream = self.id, kernel, error = %e, "kernel failed");
            e
        })
    }

    /// 等待流上所有工作完成
    pub fn synchronize(&self) -> Result<()> { Ok(()) }
}
