use std::sync::Arc;

use rayon::prelude::*;

use crate::buffer::search::{Seed, INTERVALS, QUERIES, SEEDS};
use crate::device::{Kernel, Launch};
use crate::error::{FmiError, Result};
use crate::index::{FmiTable, PackedIndex, SaInterval};

/// 主机上执行的搜索内核：每个种子先查 FMI 表，再逐步 LF 扩展。
/// 种子之间互相独立，用 rayon 并行处理。
pub struct HostSearchKernel {
    index: Arc<PackedIndex>,
    table: Option<Arc<FmiTable>>,
}

impl HostSearchKernel {
    pub fn new(index: Arc<PackedIndex>, table: Option<Arc<FmiTable>>) -> Self {
        Self { index, table }
    }

    pub fn search(&self, pattern: &[u8]) -> SaInterval {
        match &self.table {
            Some(table) => table.search(&self.index, pattern),
            None => self.index.backward_search(pattern),
        }
    }
}

fn take_region<'a>(launch: &Launch, parts: &mut [&'a mut [u8]], name: &str) -> Result<&'a mut [u8]> {
    let i = launch
        .layout
        .index_of(name)
        .ok_or_else(|| FmiError::region(name, "not present in layout"))?;
    Ok(std::mem::take(&mut parts[i]))
}

/// `n` 个 `T` 所需的字节数，超出区域大小时报告该区域的容量
fn region_bytes<T>(region: &'static str, n: usize, available: usize) -> Result<usize> {
    let size = std::mem::size_of::<T>();
    match n.checked_mul(size) {
        Some(bytes) if bytes <= available => Ok(bytes),
        _ => Err(FmiError::CapacityExceeded { region, requested: n, capacity: available / size }),
    }
}

impl Kernel for HostSearchKernel {
    fn run(&self, launch: &Launch, memory: &mut [u8]) -> Result<()> {
        let n = launch.used_of(SEEDS);
        let mut parts = launch.layout.split_mut(memory);
        let queries = take_region(launch, &mut parts, QUERIES)?;
        let seeds = take_region(launch, &mut parts, SEEDS)?;
        let intervals = take_region(launch, &mut parts, INTERVALS)?;

        let seed_bytes = region_bytes::<Seed>(SEEDS, n, seeds.len())?;
        let interval_bytes = region_bytes::<SaInterval>(INTERVALS, n, intervals.len())?;
        let seeds: &[Seed] =
            bytemuck::try_cast_slice(&seeds[..seed_bytes]).map_err(|e| FmiError::region(SEEDS, e.to_string()))?;
        let intervals: &mut [SaInterval] = bytemuck::try_cast_slice_mut(&mut intervals[..interval_bytes])
            .map_err(|e| FmiError::region(INTERVALS, e.to_string()))?;
        let queries: &[u8] = queries;

        intervals
            .par_iter_mut()
            .zip(seeds.par_iter())
            .try_for_each(|(out, seed)| {
                let pattern = queries
                    .get(seed.range())
                    .ok_or_else(|| FmiError::region(QUERIES, format!("seed {:?} outside query buffer", seed)))?;
                *out = self.search(pattern);
                Ok(())
            })
    }
}
