use bytemuck::{Pod, Zeroable};

use crate::error::{FmiError, Result};

/// 原始分配的对齐单位（字节）；子区域同样按此对齐
pub const ALIGNMENT: usize = 16;

#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
struct Chunk([u8; ALIGNMENT]);

/// 16 字节对齐的原始字节分配。
///
/// 主机缓冲区与模拟设备分配都用它承载，这样按 16 字节对齐切出的子区域
/// 可以直接通过 `bytemuck` 转换为 `&[T]`。
#[derive(Debug, Clone, Default)]
pub struct AlignedBytes {
    chunks: Vec<Chunk>,
    len: usize,
}

impl AlignedBytes {
    /// 分配 `len` 字节并清零；分配失败返回 `HostAlloc` 而不是中止进程
    pub fn zeroed(len: usize) -> Result<Self> {
        let n = len.div_ceil(ALIGNMENT);
        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(n)
            .map_err(|_| FmiError::HostAlloc { bytes: len })?;
        chunks.resize(n, Chunk::default());
        Ok(Self { chunks, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.chunks)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.chunks)[..self.len]
    }
}
