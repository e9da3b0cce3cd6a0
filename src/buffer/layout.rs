//! 缓冲区布局描述：有序的 `{name, elementSize, count, alignment}` 列表，
//! 由 [`partition`] 换算为各区域在原始分配中的偏移。
//! 主机与设备两侧使用同一个布局（基址各自独立）。

use std::ops::Range;

pub use crate::util::aligned::ALIGNMENT as BUFFER_ALIGN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 主机 -> 设备
    Input,
    /// 设备 -> 主机
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSpec {
    pub name: &'static str,
    pub element_size: usize,
    pub count: usize,
    pub align: usize,
    pub direction: Direction,
}

impl RegionSpec {
    pub fn input<T>(name: &'static str, count: usize) -> Self {
        Self::of::<T>(name, count, Direction::Input)
    }

    pub fn output<T>(name: &'static str, count: usize) -> Self {
        Self::of::<T>(name, count, Direction::Output)
    }

    fn of<T>(name: &'static str, count: usize, direction: Direction) -> Self {
        Self {
            name,
            element_size: std::mem::size_of::<T>(),
            count,
            align: BUFFER_ALIGN,
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub offset: usize,
    pub element_size: usize,
    pub count: usize,
    pub direction: Direction,
}

impl Region {
    pub fn bytes(&self) -> usize {
        self.element_size * self.count
    }

    pub fn end(&self) -> usize {
        self.offset + self.bytes()
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    /// 前 `items` 个条目占用的字节范围
    pub fn used_range(&self, items: usize) -> Range<usize> {
        self.offset..self.offset + items.min(self.count) * self.element_size
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    regions: Vec<Region>,
    total: usize,
}

#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// 按声明顺序依次排布各区域，每个区域起点对齐到其 `align`
pub fn partition(specs: &[RegionSpec]) -> Layout {
    let mut cursor = 0usize;
    let mut regions = Vec::with_capacity(specs.len());
    for spec in specs {
        let offset = align_up(cursor, spec.align.max(1));
        let region = Region {
            name: spec.name,
            offset,
            element_size: spec.element_size,
            count: spec.count,
            direction: spec.direction,
        };
        cursor = region.end();
        regions.push(region);
    }
    Layout { regions, total: cursor }
}

impl Layout {
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name == name)
    }

    /// 最后一个区域的结束位置
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// 把一块按本布局组织的内存切分为各区域的可变切片（按区域顺序）
    pub fn split_mut<'a>(&self, memory: &'a mut [u8]) -> Vec<&'a mut [u8]> {
        let mut rest = memory;
        let mut consumed = 0usize;
        let mut out = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let (_, tail) = std::mem::take(&mut rest).split_at_mut(region.offset - consumed);
            let (this, tail) = tail.split_at_mut(region.bytes());
            consumed = region.end();
            out.push(this);
            rest = tail;
        }
        out
    }
}
