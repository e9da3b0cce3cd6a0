//! FMI 查找表：为所有长度 < maxLevels 的碱基串预先计算反向搜索的区间端点，
//! 使搜索可以直接跳过前 skipLevels 步 LF 映射。
//!
//! 表体存放的是区间端点（u64）而非完整区间。第 k 层包含：
//! - `[init, top)`：4^k 个"常规"端点，串 s 的编号 id 处存 low(s)；
//! - `[top, 下一层 init)`：4^(k-1) 个"转义"端点，存每组 4 个兄弟串中最后一个的
//!   high（等于转义符号分支的 low）。
//!
//! 同组内 high(s_i) == low(s_{i+1})，所以查表只需读一到两个端点。
//! 层大小为 4^k + 4^(k-1)，不是 5 的幂。
//!
//! 规模参考（levels, size）：(8, 0.8MB) (9, 3.2MB) (10, 13MB) (11, 52MB) (12, 210MB) (13, 840MB)

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;

use crate::error::{FmiError, Result};
use crate::index::fm::{PackedIndex, SaInterval};
use crate::util::dna;

pub const ALPHABET_SIZE: u32 = dna::SIGMA as u32;
/// 第 0 层 + 正向层
pub const MIN_LEVELS: u32 = 2;
/// 元素总数须可用 u32 寻址
pub const MAX_LEVELS: u32 = 15;
/// 第 0 层的元素数：{0, bwtLen}
pub const MIN_ELEMENTS: u32 = 2;
pub const DEFAULT_LEVELS: u32 = 11;
pub const DEFAULT_SKIP_LEVELS: u32 = 10;

/// 每层的起始下标（init）与转义子块起始下标（top）
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct OffsetTableEntry {
    pub init: u32,
    pub top: u32,
}

/// 表规格记录：maxLevels, skipLevels, totalElements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableSpecs {
    pub max_levels: u32,
    pub skip_levels: u32,
    pub total_elements: u32,
}

impl TableSpecs {
    /// 按层数计算规格；levels/skip 为 0 时取默认值
    pub fn new(max_levels: u32, skip_levels: u32) -> Result<Self> {
        let max_levels = if max_levels == 0 { DEFAULT_LEVELS } else { max_levels };
        let skip_levels = if skip_levels == 0 {
            DEFAULT_SKIP_LEVELS.min(max_levels.saturating_sub(1))
        } else {
            skip_levels
        };
        check_levels(max_levels)?;
        if skip_levels >= max_levels {
            return Err(FmiError::IncompatibleTableSize(format!(
                "skip levels {} must be below table levels {}",
                skip_levels, max_levels
            )));
        }
        Ok(Self { max_levels, skip_levels, total_elements: num_elements(max_levels)? })
    }

    pub fn body_bytes(&self) -> usize {
        self.total_elements as usize * std::mem::size_of::<u64>()
    }

    pub fn offsets_bytes(&self) -> usize {
        self.max_levels as usize * std::mem::size_of::<OffsetTableEntry>()
    }
}

fn check_levels(levels: u32) -> Result<()> {
    if levels < MIN_LEVELS {
        return Err(FmiError::IncompatibleTableSize(format!(
            "{} levels requested, at least {} required",
            levels, MIN_LEVELS
        )));
    }
    if levels > MAX_LEVELS {
        return Err(FmiError::IncompatibleTableSize(format!(
            "{} levels requested, at most {} supported",
            levels, MAX_LEVELS
        )));
    }
    Ok(())
}

/// 表体元素总数
pub fn num_elements(levels: u32) -> Result<u32> {
    check_levels(levels)?;
    Ok(level_offsets(levels).1)
}

/// 预先计算每层的 (init, top)，并返回元素总数
fn level_offsets(levels: u32) -> (Vec<OffsetTableEntry>, u32) {
    let mut offsets = Vec::with_capacity(levels as usize);
    offsets.push(OffsetTableEntry { init: 0, top: 1 });
    let mut total = MIN_ELEMENTS;
    let mut regular = 1u32;
    for _ in 1..levels {
        regular *= ALPHABET_SIZE;
        let escape = regular.div_ceil(ALPHABET_SIZE);
        offsets.push(OffsetTableEntry { init: total, top: total + regular });
        total += regular + escape;
    }
    (offsets, total)
}

/// 反向层中一个子端点的写入位置。
///
/// 上一层第 `id_entry` 个端点（含转义端点）以碱基 `base` 扩展：
/// 常规端点落入本层常规区 `init + base * numLeft + id_entry`；
/// 转义端点落入本层转义区 `top + base * numRight + (id_entry - numLeft)`。
pub fn backward_slot(prev: OffsetTableEntry, curr: OffsetTableEntry, base: u32, id_entry: u32) -> usize {
    let num_left = prev.top - prev.init;
    let num_right = curr.init - prev.top;
    if id_entry < num_left {
        (curr.init + base * num_left + id_entry) as usize
    } else {
        (curr.top + base * num_right + (id_entry - num_left)) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FmiTable {
    pub specs: TableSpecs,
    pub offsets: Vec<OffsetTableEntry>,
    pub body: Vec<u64>,
}

impl FmiTable {
    /// 检查规格自洽：层数在支持范围内，元素数与层数一致，skip 小于层数
    pub fn check_specs(specs: &TableSpecs) -> Result<()> {
        check_levels(specs.max_levels)?;
        let expected = num_elements(specs.max_levels)?;
        if specs.total_elements != expected {
            return Err(FmiError::IncompatibleTableSize(format!(
                "{} elements declared for {} levels, expected {}",
                specs.total_elements, specs.max_levels, expected
            )));
        }
        if specs.skip_levels >= specs.max_levels {
            return Err(FmiError::IncompatibleTableSize(format!(
                "skip levels {} must be below table levels {}",
                specs.skip_levels, specs.max_levels
            )));
        }
        Ok(())
    }

    /// 分配好规格对应的空表
    pub fn allocate(specs: TableSpecs) -> Result<Self> {
        Self::check_specs(&specs)?;
        let mut body = Vec::new();
        body.try_reserve_exact(specs.total_elements as usize)
            .map_err(|_| FmiError::HostAlloc { bytes: specs.body_bytes() })?;
        body.resize(specs.total_elements as usize, 0);
        Ok(Self {
            specs,
            offsets: vec![OffsetTableEntry::default(); specs.max_levels as usize],
            body,
        })
    }

    /// 基于打包索引构建 maxLevels 层的查找表
    pub fn build(index: &PackedIndex, max_levels: u32, skip_levels: u32) -> Result<Self> {
        let specs = TableSpecs::new(max_levels, skip_levels)?;
        let mut table = Self::allocate(specs)?;
        table.offsets = level_offsets(specs.max_levels).0;

        table.body[0] = 0;
        table.body[1] = index.bwt_len;
        table.process_forward_level(index, 1);
        for level in 2..specs.max_levels as usize {
            table.process_backward_level(index, level);
        }
        log::info!(
            "FMI table built: {} levels, skip {}, {} elements ({} bytes)",
            specs.max_levels,
            specs.skip_levels,
            specs.total_elements,
            table.size_in_bytes()
        );
        Ok(table)
    }

    /// 第 1 层：由第 0 层的 [L, R] 一次生成 4 个常规端点 + 1 个转义端点
    fn process_forward_level(&mut self, index: &PackedIndex, level: usize) {
        let prev = self.offsets[level - 1];
        let next = self.offsets[level];
        let n_bases = ALPHABET_SIZE;
        for id_entry in 0..(prev.top - prev.init) {
            let id_l = prev.init + id_entry;
            let id_r = if id_entry % n_bases == n_bases - 1 {
                prev.top + id_entry / n_bases
            } else {
                id_l + 1
            };
            let l = self.body[id_l as usize];
            let r = self.body[id_r as usize];
            // low(A) 来自 L，其余 4 个端点都来自 R：high(c) == low(c+1)
            let base_at = (next.init + id_entry * n_bases) as usize;
            self.body[base_at] = index.advance(l, 0);
            for base in 0..n_bases - 1 {
                self.body[base_at + base as usize + 1] = index.advance(r, base as u8);
            }
            self.body[(next.top + id_entry) as usize] = index.advance(r, (n_bases - 1) as u8);
        }
    }

    /// 第 k >= 2 层：外层按碱基循环保持输出按块连续
    fn process_backward_level(&mut self, index: &PackedIndex, level: usize) {
        let prev = self.offsets[level - 1];
        let curr = self.offsets[level];
        for base in 0..ALPHABET_SIZE {
            let children: Vec<u64> = self.body[prev.init as usize..curr.init as usize]
                .par_iter()
                .map(|&p| index.advance(p, base as u8))
                .collect();
            for (id_entry, child) in children.into_iter().enumerate() {
                self.body[backward_slot(prev, curr, base, id_entry as u32)] = child;
            }
        }
    }

    #[inline]
    pub fn max_levels(&self) -> u32 {
        self.specs.max_levels
    }

    #[inline]
    pub fn skip_levels(&self) -> u32 {
        self.specs.skip_levels
    }

    #[inline]
    pub fn total_elements(&self) -> u32 {
        self.specs.total_elements
    }

    /// 查表得到前缀的区间；前缀过长或含转义符号时返回 None
    pub fn lookup(&self, prefix: &[u8]) -> Option<SaInterval> {
        let level = prefix.len();
        if level >= self.specs.max_levels as usize {
            return None;
        }
        let mut id = 0u32;
        for &c in prefix {
            if !dna::is_base(c) {
                return None;
            }
            id = id * ALPHABET_SIZE + c as u32;
        }
        let off = self.offsets[level];
        let low = self.body[(off.init + id) as usize];
        let high = if id % ALPHABET_SIZE == ALPHABET_SIZE - 1 {
            self.body[(off.top + id / ALPHABET_SIZE) as usize]
        } else {
            self.body[(off.init + id + 1) as usize]
        };
        Some(SaInterval::new(low, high))
    }

    /// 查表 + LF 扩展的反向搜索：
    /// 长度 >= skipLevels 的 pattern 先查最右侧 skipLevels 个符号，再逐个向左扩展
    pub fn search(&self, index: &PackedIndex, pattern: &[u8]) -> SaInterval {
        let skip = self.specs.skip_levels as usize;
        if skip == 0 || pattern.len() < skip {
            return index.backward_search(pattern);
        }
        let (head, tail) = pattern.split_at(pattern.len() - skip);
        match self.lookup(tail) {
            Some(interval) => index.backward_search_from(interval, head),
            // 尾部含转义符号，退回逐步扩展
            None => index.backward_search(pattern),
        }
    }

    pub fn offsets_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.offsets)
    }

    pub fn body_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.body)
    }

    /// 偏移元数据 + 表体的字节数
    pub fn size_in_bytes(&self) -> usize {
        self.specs.offsets_bytes() + self.specs.body_bytes()
    }
}
