use std::path::Path;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::entry::{self, PackedIndexEntry};
use crate::util::dna;

/// 后缀数组区间 [low, high)；low >= high 表示无匹配
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct SaInterval {
    pub low: u64,
    pub high: u64,
}

impl SaInterval {
    pub const EMPTY: SaInterval = SaInterval { low: 0, high: 0 };

    pub fn new(low: u64, high: u64) -> Self {
        Self { low, high }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    /// 区间内的后缀数（即匹配次数）
    #[inline]
    pub fn len(&self) -> u64 {
        self.high.saturating_sub(self.low)
    }
}

/// 索引构建元信息（来源、参数、时间戳），随索引一起保存
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexMeta {
    pub source_file: Option<String>,
    pub build_args: Option<String>,
    pub build_timestamp: Option<String>,
}

/// 打包后的 FM 索引：
/// - `entries` 为 BWT 的 128 符号分块（交替计数器 + 3 位平面位图）；
/// - `cumulative[c]` 为排序在碱基 c 之前的符号总数（含所有 `$`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedIndex {
    pub bwt_len: u64,
    pub cumulative: [u64; dna::SIGMA],
    pub entries: Vec<PackedIndexEntry>,
    #[serde(default)]
    pub meta: IndexMeta,
}

impl PackedIndex {
    /// 从已编码的 BWT 构建（A=0 C=1 G=2 T=3 N=4 $=5）
    pub fn from_bwt(bwt: &[u8]) -> Self {
        let mut freq = [0u64; dna::SIGMA];
        let mut separators = 0u64;
        for &code in bwt {
            if dna::is_base(code) {
                freq[code as usize] += 1;
            } else if code == dna::CODE_SEP {
                separators += 1;
            }
        }
        // $ 排在所有碱基之前，N 排在所有碱基之后
        let mut cumulative = [0u64; dna::SIGMA];
        let mut acc = separators;
        for c in 0..dna::SIGMA {
            cumulative[c] = acc;
            acc += freq[c];
        }

        Self {
            bwt_len: bwt.len() as u64,
            cumulative,
            entries: entry::pack_bwt(bwt),
            meta: IndexMeta::default(),
        }
    }

    /// 从 ASCII BWT 构建（A/C/G/T，`$` 为分隔符，其余字符视为 N）
    pub fn from_ascii_bwt(bwt: &[u8]) -> Self {
        Self::from_bwt(&dna::encode_seq(bwt))
    }

    pub fn set_meta(&mut self, meta: IndexMeta) {
        self.meta = meta;
    }

    #[inline]
    pub fn full_interval(&self) -> SaInterval {
        SaInterval::new(0, self.bwt_len)
    }

    /// BWT[0..position) 中 base 的出现次数
    #[inline]
    pub fn rank(&self, position: u64, base: u8) -> u64 {
        entry::rank(&self.entries, position, base)
    }

    /// BWT 第 `row` 个符号；转义符号（N、$）返回 None
    pub fn symbol_at(&self, row: u64) -> Option<u8> {
        if row >= self.bwt_len {
            return None;
        }
        let block = (row / entry::ENTRY_SIZE as u64) as usize;
        self.entries[block].symbol((row % entry::ENTRY_SIZE as u64) as usize)
    }

    /// LF 映射的一步：把区间端点 `position` 向左扩展一个碱基
    #[inline]
    pub fn advance(&self, position: u64, base: u8) -> u64 {
        self.cumulative[base as usize] + self.rank(position, base)
    }

    /// 对区间两端同时做一步扩展；转义符号无法扩展，返回空区间
    #[inline]
    pub fn advance_interval(&self, interval: SaInterval, base: u8) -> SaInterval {
        if !dna::is_base(base) {
            return SaInterval::EMPTY;
        }
        SaInterval::new(self.advance(interval.low, base), self.advance(interval.high, base))
    }

    /// 从给定区间出发，按 pattern 从右到左继续反向搜索。
    /// 空区间继续扩展仍为空，不提前返回，结果与查表得到的端点逐位一致。
    pub fn backward_search_from(&self, mut interval: SaInterval, pattern: &[u8]) -> SaInterval {
        for &c in pattern.iter().rev() {
            interval = self.advance_interval(interval, c);
        }
        interval
    }

    /// 反向搜索精确匹配，pattern 为编码后的符号
    pub fn backward_search(&self, pattern: &[u8]) -> SaInterval {
        if self.bwt_len == 0 {
            return SaInterval::EMPTY;
        }
        self.backward_search_from(self.full_interval(), pattern)
    }

    /// 条目数据的字节视图（设备复制用）
    pub fn entry_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.entries)
    }

    pub fn size_in_bytes(&self) -> usize {
        self.entries.len() * std::mem::size_of::<PackedIndexEntry>()
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = std::fs::File::create(path)?;
        let mut w = std::io::BufWriter::new(f);
        bincode::serialize_into(&mut w, self)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        let idx: Self = bincode::deserialize_from(std::io::BufReader::new(f))?;
        Ok(idx)
    }
}
