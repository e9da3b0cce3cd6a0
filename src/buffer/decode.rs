//! SA decode 缓冲区：`init_positions -> end_positions`
//!
//! 设备侧从每个起始行做 LF 回溯，直到到达采样行；主机再用
//! [`SampledSa::resolve`](crate::index::SampledSa::resolve) 换算为文本坐标。

use crate::buffer::{AcceleratorBuffer, BufferKind, Capacity, RegionSpec, Shape};
use crate::device::{Accelerator, Operation};
use crate::error::Result;
use crate::index::DecodeEndPos;

pub const INIT_POSITIONS: &str = "init_positions";
pub const END_POSITIONS: &str = "end_positions";

pub struct DecodeKind;

impl BufferKind for DecodeKind {
    const OPERATION: Operation = Operation::Decode;

    fn bytes_per_candidate(_shape: &Shape) -> f64 {
        (std::mem::size_of::<u64>() + std::mem::size_of::<DecodeEndPos>()) as f64
    }

    fn capacity(units: usize, _shape: &Shape) -> Capacity {
        Capacity { max_bases: 0, max_queries: units, max_candidates: units }
    }

    fn regions(capacity: &Capacity) -> Vec<RegionSpec> {
        vec![
            RegionSpec::input::<u64>(INIT_POSITIONS, capacity.max_candidates),
            RegionSpec::output::<DecodeEndPos>(END_POSITIONS, capacity.max_candidates),
        ]
    }
}

pub type DecodeBuffer<A> = AcceleratorBuffer<A, DecodeKind>;

impl<A: Accelerator> AcceleratorBuffer<A, DecodeKind> {
    pub fn max_positions(&self) -> usize {
        self.capacity().max_candidates
    }

    pub fn init_positions_mut(&mut self) -> Result<&mut [u64]> {
        self.region_mut(INIT_POSITIONS)
    }

    pub fn end_positions(&self) -> Result<&[DecodeEndPos]> {
        self.region(END_POSITIONS)
    }

    /// 提交前 `num_positions` 个起始行，内核以 `sampling_rate` 判断采样行
    pub fn send(&mut self, num_positions: usize, sampling_rate: u32) -> Result<()> {
        self.submit(&[num_positions, num_positions], sampling_rate)
    }
}
