//! 精确搜索缓冲区：`queries -> seeds -> intervals`

use bytemuck::{Pod, Zeroable};

use crate::buffer::{AcceleratorBuffer, BufferKind, Capacity, RegionSpec, Shape};
use crate::device::{Accelerator, Operation};
use crate::error::{FmiError, Result};
use crate::index::SaInterval;

pub const QUERIES: &str = "queries";
pub const SEEDS: &str = "seeds";
pub const INTERVALS: &str = "intervals";

/// 查询缓冲区中的一段子串 `[offset, offset + length)`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Seed {
    pub offset: u32,
    pub length: u32,
}

impl Seed {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset as usize..self.offset as usize + self.length as usize
    }
}

pub struct SearchKind;

impl BufferKind for SearchKind {
    const OPERATION: Operation = Operation::Search;

    fn bytes_per_candidate(shape: &Shape) -> f64 {
        (shape.avg_query_size + std::mem::size_of::<Seed>() + std::mem::size_of::<SaInterval>()) as f64
    }

    fn capacity(units: usize, shape: &Shape) -> Capacity {
        Capacity {
            max_bases: units * shape.avg_query_size,
            max_queries: units,
            max_candidates: units,
        }
    }

    fn regions(capacity: &Capacity) -> Vec<RegionSpec> {
        vec![
            RegionSpec::input::<u8>(QUERIES, capacity.max_bases),
            RegionSpec::input::<Seed>(SEEDS, capacity.max_candidates),
            RegionSpec::output::<SaInterval>(INTERVALS, capacity.max_candidates),
        ]
    }
}

pub type SearchBuffer<A> = AcceleratorBuffer<A, SearchKind>;

impl<A: Accelerator> AcceleratorBuffer<A, SearchKind> {
    pub fn max_seeds(&self) -> usize {
        self.capacity().max_candidates
    }

    pub fn max_bases(&self) -> usize {
        self.capacity().max_bases
    }

    pub fn queries_mut(&mut self) -> Result<&mut [u8]> {
        self.region_mut(QUERIES)
    }

    pub fn seeds_mut(&mut self) -> Result<&mut [Seed]> {
        self.region_mut(SEEDS)
    }

    pub fn intervals(&self) -> Result<&[SaInterval]> {
        self.region(INTERVALS)
    }

    /// 把一批编码后的 pattern 依次写入查询区，每个 pattern 对应一个种子。
    /// 超出容量时先扩容，返回种子数。
    pub fn load_patterns<P: AsRef<[u8]>>(&mut self, patterns: &[P]) -> Result<usize> {
        let bases: usize = patterns.iter().map(|p| p.as_ref().len()).sum();
        if bases > u32::MAX as usize {
            return Err(FmiError::CapacityExceeded { region: QUERIES, requested: bases, capacity: u32::MAX as usize });
        }
        if !self.capacity().covers(bases, patterns.len(), patterns.len()) {
            self.ensure_capacity(bases, patterns.len(), patterns.len())?;
        }

        let mut seeds = Vec::with_capacity(patterns.len());
        let queries = self.queries_mut()?;
        let mut offset = 0usize;
        for p in patterns {
            let p = p.as_ref();
            queries[offset..offset + p.len()].copy_from_slice(p);
            seeds.push(Seed { offset: offset as u32, length: p.len() as u32 });
            offset += p.len();
        }
        self.seeds_mut()?[..seeds.len()].copy_from_slice(&seeds);
        Ok(seeds.len())
    }

    /// 提交 `num_seeds` 个种子（引用前 `num_bases` 个碱基）
    pub fn send(&mut self, num_bases: usize, num_seeds: usize) -> Result<()> {
        self.submit(&[num_bases, num_seeds, num_seeds], 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::BufferConfig;
    use crate::device::{HostSearchKernel, MemorySpace, SimDevice};
    use crate::index::{testutil, FmiTable, PackedIndex};
    use crate::util::dna;

    fn search_device(idx: &Arc<PackedIndex>, table: Option<Arc<FmiTable>>, space: MemorySpace) -> Arc<SimDevice> {
        let kernel = Arc::new(HostSearchKernel::new(Arc::clone(idx), table));
        Arc::new(SimDevice::new(0, 1 << 24, space).with_kernel(Operation::Search, kernel))
    }

    fn run(dev: Arc<SimDevice>, patterns: &[Vec<u8>], config: BufferConfig) -> Vec<SaInterval> {
        let mut buf = SearchBuffer::new(dev, config, Shape::new(4, 1)).unwrap();
        let n = buf.load_patterns(patterns).unwrap();
        let bases = patterns.iter().map(Vec::len).sum();
        buf.send(bases, n).unwrap();
        buf.receive().unwrap();
        buf.intervals().unwrap()[..n].to_vec()
    }

    #[test]
    fn device_search_matches_host_search() {
        let text = testutil::make_text(3000, 17);
        let (_, idx) = testutil::build_index(&text);
        let idx = Arc::new(idx);
        let table = Arc::new(FmiTable::build(&idx, 5, 4).unwrap());

        let patterns: Vec<Vec<u8>> = (0..200)
            .map(|i| {
                let start = (i * 13) % (text.len() - 12);
                let len = 1 + i % 12;
                dna::encode_seq(&text[start..start + len])
            })
            .chain(std::iter::once(dna::encode_seq(b"ACGTNACGT")))
            .collect();
        let expected: Vec<SaInterval> = patterns.iter().map(|p| idx.backward_search(p)).collect();

        for space in [MemorySpace::DeviceMapped, MemorySpace::HostMapped] {
            for threshold in [0.0, 1.0] {
                let config = BufferConfig { size_bytes: 1 << 12, transfer_threshold: threshold, ..Default::default() };
                let dev = search_device(&idx, Some(Arc::clone(&table)), space);
                assert_eq!(run(dev, &patterns, config), expected, "{:?} threshold {}", space, threshold);
            }
        }
        let dev = search_device(&idx, None, MemorySpace::DeviceMapped);
        assert_eq!(run(dev, &patterns, BufferConfig::default()), expected);
    }

    #[test]
    fn transfer_modes_differ_in_copy_count() {
        let (_, idx) = testutil::build_index(&testutil::make_text(500, 2));
        let idx = Arc::new(idx);
        let patterns: Vec<Vec<u8>> = vec![vec![0, 1], vec![2, 3, 0]];

        let dense = search_device(&idx, None, MemorySpace::DeviceMapped);
        run(Arc::clone(&dense), &patterns, BufferConfig { transfer_threshold: 0.0, ..Default::default() });
        assert_eq!(dense.stats().h2d_copies, 1);

        let sparse = search_device(&idx, None, MemorySpace::DeviceMapped);
        run(Arc::clone(&sparse), &patterns, BufferConfig { transfer_threshold: 1.0, ..Default::default() });
        assert_eq!(sparse.stats().h2d_copies, 2);
        assert_eq!(sparse.stats().d2h_copies, 1);
    }

    #[test]
    fn load_patterns_grows_buffer() {
        let (_, idx) = testutil::build_index(b"ACGTACGT");
        let dev = search_device(&Arc::new(idx), None, MemorySpace::DeviceMapped);
        let config = BufferConfig { size_bytes: 128, ..Default::default() };
        let mut buf = SearchBuffer::new(dev, config, Shape::default()).unwrap();
        assert_eq!(buf.max_seeds(), 2);
        let patterns = vec![vec![0u8; 40]; 10];
        assert_eq!(buf.load_patterns(&patterns).unwrap(), 10);
        assert!(buf.max_seeds() >= 10 && buf.max_bases() >= 400);
        assert_eq!(buf.seeds_mut().unwrap()[9], Seed { offset: 360, length: 40 });
    }
}
