//! k-mer 过滤缓冲区：`queries -> query_info -> candidates -> alignments`
//!
//! 每个候选是参考序列上的一个位置，内核对其做 k-mer 计数过滤，
//! 输出估计的编辑距离下界（超过 `max_error` 的候选被丢弃）。

use bytemuck::{Pod, Zeroable};

use crate::buffer::{AcceleratorBuffer, BufferKind, Capacity, RegionSpec, Shape};
use crate::device::{Accelerator, Operation};
use crate::error::Result;

pub const QUERIES: &str = "queries";
pub const QUERY_INFO: &str = "query_info";
pub const CANDIDATES: &str = "candidates";
pub const ALIGNMENTS: &str = "alignments";

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KmerQueryInfo {
    pub init_offset: u32,
    pub size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct KmerCandidate {
    /// 参考序列上的起始位置
    pub position: u64,
    /// 所属查询的下标
    pub query: u32,
    pub size: u32,
}

pub struct KmerKind;

impl BufferKind for KmerKind {
    const OPERATION: Operation = Operation::KmerFilter;

    fn bytes_per_candidate(shape: &Shape) -> f64 {
        let per_query = shape.avg_query_size + std::mem::size_of::<KmerQueryInfo>();
        per_query as f64 / shape.candidates_per_query as f64
            + (std::mem::size_of::<KmerCandidate>() + std::mem::size_of::<u32>()) as f64
    }

    fn capacity(units: usize, shape: &Shape) -> Capacity {
        let max_queries = units / shape.candidates_per_query;
        Capacity {
            max_bases: max_queries * shape.avg_query_size,
            max_queries,
            max_candidates: units,
        }
    }

    fn regions(capacity: &Capacity) -> Vec<RegionSpec> {
        vec![
            RegionSpec::input::<u8>(QUERIES, capacity.max_bases),
            RegionSpec::input::<KmerQueryInfo>(QUERY_INFO, capacity.max_queries),
            RegionSpec::input::<KmerCandidate>(CANDIDATES, capacity.max_candidates),
            RegionSpec::output::<u32>(ALIGNMENTS, capacity.max_candidates),
        ]
    }
}

pub type KmerBuffer<A> = AcceleratorBuffer<A, KmerKind>;

impl<A: Accelerator> AcceleratorBuffer<A, KmerKind> {
    pub fn max_bases(&self) -> usize {
        self.capacity().max_bases
    }

    pub fn max_queries(&self) -> usize {
        self.capacity().max_queries
    }

    pub fn max_candidates(&self) -> usize {
        self.capacity().max_candidates
    }

    pub fn queries_mut(&mut self) -> Result<&mut [u8]> {
        self.region_mut(QUERIES)
    }

    pub fn query_info_mut(&mut self) -> Result<&mut [KmerQueryInfo]> {
        self.region_mut(QUERY_INFO)
    }

    pub fn candidates_mut(&mut self) -> Result<&mut [KmerCandidate]> {
        self.region_mut(CANDIDATES)
    }

    pub fn alignments(&self) -> Result<&[u32]> {
        self.region(ALIGNMENTS)
    }

    pub fn send(&mut self, num_bases: usize, num_queries: usize, num_candidates: usize, max_error: u32) -> Result<()> {
        self.submit(&[num_bases, num_queries, num_candidates, num_candidates], max_error)
    }
}
