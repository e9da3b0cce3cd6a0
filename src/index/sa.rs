use bytemuck::{Pod, Zeroable};

use crate::error::{FmiError, Result};

/// decode 的终点：从起始位置 LF 回溯 `steps` 步后到达的采样行 `interval`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DecodeEndPos {
    pub interval: u64,
    pub steps: u64,
}

/// 稀疏采样的后缀数组：保留 SA[i]（i % samplingRate == 0）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledSa {
    pub sampling_rate: u64,
    pub entries: Vec<u64>,
}

impl SampledSa {
    pub fn from_sa(sa: &[u64], sampling_rate: u64) -> Result<Self> {
        if sampling_rate == 0 {
            return Err(FmiError::Config("SA sampling rate must be positive".into()));
        }
        let entries = sa.iter().step_by(sampling_rate as usize).copied().collect();
        Ok(Self { sampling_rate, entries })
    }

    pub fn num_entries(&self) -> u64 {
        self.entries.len() as u64
    }

    /// 将设备返回的 decode 终点换算为文本坐标；终点不在采样行上时返回 None
    pub fn resolve(&self, end: DecodeEndPos) -> Option<u64> {
        if end.interval % self.sampling_rate != 0 {
            return None;
        }
        self.entries
            .get((end.interval / self.sampling_rate) as usize)
            .map(|&pos| pos + end.steps)
    }

    pub fn entry_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries.len() * std::mem::size_of::<u64>()
    }
}
