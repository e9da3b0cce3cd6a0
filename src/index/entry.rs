//! BWT 打包条目与 rank 原语。
//!
//! 每个条目覆盖 128 个连续 BWT 符号：
//! - 2 个 64 位计数器：只存 4 个碱基中的 2 个（交替计数器），另外 2 个
//!   从相邻条目恢复；
//! - 12 个 32 位位图：每 32 个位置一组，每组 3 个位平面
//!   （bit0 平面、bit1 平面、"是碱基" 平面）。
//!
//! 位置 p 在组内对应位 `31 - p`（高位在前），rank 只需掩码 + popcount。

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::util::dna;

/// 每个条目覆盖的 BWT 符号数
pub const ENTRY_SIZE: usize = 128;
/// 每个符号的编码位数
pub const BWT_CHAR_LENGTH: usize = 3;
pub const NUM_COUNTERS: usize = 4;
pub const ALTERNATE_COUNTERS: usize = 2;
pub const COUNTERS_PER_ENTRY: usize = NUM_COUNTERS / ALTERNATE_COUNTERS;
pub const BITMAPS_PER_ENTRY: usize = ENTRY_SIZE * BWT_CHAR_LENGTH / WORD_BITS;

const WORD_BITS: usize = 32;
const CHUNKS_PER_ENTRY: usize = ENTRY_SIZE / WORD_BITS;

/// 位图存放顺序：第 j 组的三个平面位于 `BITMAP_LAYOUT[3j..3j+3]`
const BITMAP_LAYOUT: [usize; BITMAPS_PER_ENTRY] = [3, 7, 11, 0, 1, 2, 4, 5, 6, 8, 9, 10];

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct PackedIndexEntry {
    pub counters: [u64; COUNTERS_PER_ENTRY],
    pub bitmaps: [u32; BITMAPS_PER_ENTRY],
}

/// 碱基的累计计数从哪个条目读取，以及块内计数是加还是减
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterSource {
    /// 当前条目持有该碱基的计数器：counter + 块内前缀计数
    Current,
    /// 下一个条目持有：counter - 块内从查询位置到块尾的计数
    Neighbor,
}

impl CounterSource {
    #[inline(always)]
    fn entry_delta(self) -> usize {
        match self {
            CounterSource::Current => 0,
            CounterSource::Neighbor => 1,
        }
    }
}

/// 偶数条目保存低位为 0 的碱基（A、G），奇数条目保存低位为 1 的碱基（C、T）
#[inline(always)]
pub fn counter_source(block: u64, base: u8) -> CounterSource {
    if block % ALTERNATE_COUNTERS as u64 == (base & 1) as u64 {
        CounterSource::Current
    } else {
        CounterSource::Neighbor
    }
}

/// 碱基在其所属条目中的计数器槽位（由编码的高位决定）
#[inline(always)]
pub fn counter_slot(base: u8) -> usize {
    ((base >> 1) & 1) as usize
}

/// 组内前 `shift` 个位置的掩码；shift <= 0 为空，>= 32 为全 1
#[inline(always)]
pub fn prefix_mask(shift: i32) -> u32 {
    if shift <= 0 {
        0
    } else if shift >= WORD_BITS as i32 {
        u32::MAX
    } else {
        u32::MAX << (WORD_BITS as i32 - shift)
    }
}

/// 单组 32 个位置中匹配 `base` 的计数。
/// `Current` 统计 shift 之前的位置，`Neighbor` 统计 shift 及之后的位置。
#[inline(always)]
fn count_chunk(planes: [u32; 3], base: u8, shift: i32, source: CounterSource) -> u32 {
    // 编码位为 0 时取平面的补
    let flip0 = ((base & 1) as u32).wrapping_sub(1);
    let flip1 = (((base >> 1) & 1) as u32).wrapping_sub(1);
    let matched = (planes[0] ^ flip0) & (planes[1] ^ flip1) & planes[2];
    let mask = match source {
        CounterSource::Current => prefix_mask(shift),
        CounterSource::Neighbor => !prefix_mask(shift),
    };
    (matched & mask).count_ones()
}

impl PackedIndexEntry {
    #[inline(always)]
    fn planes(&self, chunk: usize) -> [u32; 3] {
        let at = chunk * BWT_CHAR_LENGTH;
        [
            self.bitmaps[BITMAP_LAYOUT[at]],
            self.bitmaps[BITMAP_LAYOUT[at + 1]],
            self.bitmaps[BITMAP_LAYOUT[at + 2]],
        ]
    }

    /// 块内 `offset` 位置的符号；非碱基（N 或 $）返回 None
    pub fn symbol(&self, offset: usize) -> Option<u8> {
        let planes = self.planes(offset / WORD_BITS);
        let bit = (WORD_BITS - 1 - offset % WORD_BITS) as u32;
        if (planes[2] >> bit) & 1 == 0 {
            return None;
        }
        Some((((planes[1] >> bit) & 1) << 1 | ((planes[0] >> bit) & 1)) as u8)
    }

    fn pack_block(block: &[u8], counters: [u64; COUNTERS_PER_ENTRY]) -> Self {
        let mut entry = PackedIndexEntry { counters, bitmaps: [0; BITMAPS_PER_ENTRY] };
        for (offset, &code) in block.iter().enumerate() {
            if !dna::is_base(code) {
                continue;
            }
            let at = (offset / WORD_BITS) * BWT_CHAR_LENGTH;
            let bit = 1u32 << (WORD_BITS - 1 - offset % WORD_BITS);
            if code & 1 != 0 {
                entry.bitmaps[BITMAP_LAYOUT[at]] |= bit;
            }
            if code & 2 != 0 {
                entry.bitmaps[BITMAP_LAYOUT[at + 1]] |= bit;
            }
            entry.bitmaps[BITMAP_LAYOUT[at + 2]] |= bit;
        }
        entry
    }
}

/// 返回 BWT[0..position) 中 `base`（0..4）的出现次数。
///
/// 调用方保证 `entries` 由 [`pack_bwt`] 构建（末尾留有相邻条目），
/// 且 `position <= bwt_len`。
#[inline(always)]
pub fn rank(entries: &[PackedIndexEntry], position: u64, base: u8) -> u64 {
    debug_assert!(dna::is_base(base));
    let block = position / ENTRY_SIZE as u64;
    let offset = (position % ENTRY_SIZE as u64) as i32;
    let source = counter_source(block, base);

    let entry = &entries[block as usize];
    let counter = entries[block as usize + source.entry_delta()].counters[counter_slot(base)];

    let mut in_block = 0u32;
    for chunk in 0..CHUNKS_PER_ENTRY {
        let shift = offset - (chunk * WORD_BITS) as i32;
        in_block += count_chunk(entry.planes(chunk), base, shift, source);
    }
    match source {
        CounterSource::Current => counter + in_block as u64,
        CounterSource::Neighbor => counter - in_block as u64,
    }
}

/// 条目数：每 128 个符号一个，另加尾部条目保证任何位置的相邻条目存在
#[inline]
pub fn num_entries(bwt_len: usize) -> usize {
    bwt_len / ENTRY_SIZE + 2
}

/// 将已编码的 BWT（见 [`dna`]）打包为条目序列
pub fn pack_bwt(bwt: &[u8]) -> Vec<PackedIndexEntry> {
    let n_entries = num_entries(bwt.len());

    // 每个块起点处的各碱基累计计数
    let mut running = [0u64; NUM_COUNTERS];
    let mut boundary_counts = Vec::with_capacity(n_entries);
    for bi in 0..n_entries {
        boundary_counts.push(running);
        let start = (bi * ENTRY_SIZE).min(bwt.len());
        let end = ((bi + 1) * ENTRY_SIZE).min(bwt.len());
        for &code in &bwt[start..end] {
            if dna::is_base(code) {
                running[code as usize] += 1;
            }
        }
    }

    (0..n_entries)
        .into_par_iter()
        .map(|bi| {
            let parity = (bi % ALTERNATE_COUNTERS) as u8;
            let mut counters = [0u64; COUNTERS_PER_ENTRY];
            for (slot, counter) in counters.iter_mut().enumerate() {
                let base = ((slot as u8) << 1) | parity;
                *counter = boundary_counts[bi][base as usize];
            }
            let start = (bi * ENTRY_SIZE).min(bwt.len());
            let end = ((bi + 1) * ENTRY_SIZE).min(bwt.len());
            PackedIndexEntry::pack_block(&bwt[start..end], counters)
        })
        .collect()
}
