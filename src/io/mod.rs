//! 索引结构的原始二进制读写。

use std::io::{Read, Write};

use bytemuck::Pod;

use crate::error::{FmiError, Result};

pub mod sa;
pub mod table;

pub(crate) fn read_u32<R: Read>(r: &mut R, what: &'static str) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(|e| FmiError::from_read(e, what))?;
    Ok(u32::from_ne_bytes(b))
}

pub(crate) fn read_u64<R: Read>(r: &mut R, what: &'static str) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(|e| FmiError::from_read(e, what))?;
    Ok(u64::from_ne_bytes(b))
}

/// 每次读取的块大小；文件头声明的元素数不可信，内存随实际读到的数据增长
const READ_CHUNK_BYTES: usize = 1 << 20;

/// 读取恰好 `n` 个 POD 元素
pub(crate) fn read_pod_vec<T: Pod, R: Read>(r: &mut R, n: u64, what: &'static str) -> Result<Vec<T>> {
    let elem = std::mem::size_of::<T>().max(1);
    let n = usize::try_from(n).map_err(|_| FmiError::HostAlloc { bytes: usize::MAX })?;
    let total = n.checked_mul(elem).ok_or(FmiError::HostAlloc { bytes: usize::MAX })?;
    let chunk = (READ_CHUNK_BYTES / elem).max(1);

    let mut v: Vec<T> = Vec::new();
    while v.len() < n {
        let start = v.len();
        let step = chunk.min(n - start);
        v.try_reserve(step).map_err(|_| FmiError::HostAlloc { bytes: total })?;
        v.resize(start + step, T::zeroed());
        r.read_exact(bytemuck::cast_slice_mut(&mut v[start..]))
            .map_err(|e| FmiError::from_read(e, what))?;
    }
    Ok(v)
}

pub(crate) fn write_bytes<W: Write>(w: &mut W, bytes: &[u8], what: &'static str) -> Result<()> {
    w.write_all(bytes).map_err(|e| FmiError::from_write(e, what))
}
