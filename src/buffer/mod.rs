//! 通用加速器缓冲区。
//!
//! 每个缓冲区持有一块主机原始分配和一块镜像的设备分配，按操作类型
//! （[`BufferKind`]）划分为若干有类型的区域。主机映射模式下设备直接访问
//! 主机分配，不做任何拷贝。
//!
//! 一次处理的顺序固定为：传入 -> 调度 -> 传回，全部提交到缓冲区自己的流上；
//! 唯一的阻塞点是 [`AcceleratorBuffer::receive`] 中的同步，以及
//! [`AcceleratorBuffer::ensure_capacity`] 的重新分配。

use std::marker::PhantomData;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;

use crate::config::BufferConfig;
use crate::device::{Accelerator, DeviceAlloc, Launch, LaunchTarget, MemorySpace, Operation, StreamId};
use crate::error::{FmiError, Result};
use crate::util::aligned::AlignedBytes;

pub mod decode;
pub mod kmer;
pub mod layout;
pub mod search;

pub use decode::{DecodeBuffer, DecodeKind};
pub use kmer::{KmerBuffer, KmerCandidate, KmerKind, KmerQueryInfo};
pub use layout::{partition, Direction, Layout, Region, RegionSpec, BUFFER_ALIGN};
pub use search::{SearchBuffer, SearchKind, Seed};

/// 工作负载形状：平均查询长度与每个查询的候选数，均不小于 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub avg_query_size: usize,
    pub candidates_per_query: usize,
}

impl Default for Shape {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

fn ceil_ratio(total: usize, parts: usize) -> usize {
    if parts == 0 {
        1
    } else {
        total.div_ceil(parts).max(1)
    }
}

impl Shape {
    pub fn new(avg_query_size: usize, candidates_per_query: usize) -> Self {
        Self {
            avg_query_size: avg_query_size.max(1),
            candidates_per_query: candidates_per_query.max(1),
        }
    }

    /// 由实际需求反推形状（向上取整）
    pub fn from_totals(total_bases: usize, total_queries: usize, total_candidates: usize) -> Self {
        Self::new(
            ceil_ratio(total_bases, total_queries),
            ceil_ratio(total_candidates, total_queries),
        )
    }
}

/// 当前布局支持的最大条目数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capacity {
    pub max_bases: usize,
    pub max_queries: usize,
    pub max_candidates: usize,
}

impl Capacity {
    pub fn covers(&self, bases: usize, queries: usize, candidates: usize) -> bool {
        bases <= self.max_bases && queries <= self.max_queries && candidates <= self.max_candidates
    }
}

/// 一种处理单元的缓冲区布局：区域顺序、每个候选的字节开销与容量换算
pub trait BufferKind {
    const OPERATION: Operation;

    /// 每个处理单元（候选）平均占用的字节数
    fn bytes_per_candidate(shape: &Shape) -> f64;

    /// `units` 个处理单元对应的各项容量
    fn capacity(units: usize, shape: &Shape) -> Capacity;

    /// 按传输顺序排列的区域（输入在前，输出在后）
    fn regions(capacity: &Capacity) -> Vec<RegionSpec>;

    fn num_regions() -> usize {
        Self::regions(&Capacity::default()).len()
    }
}

/// 计算输入区域的主机->设备拷贝范围。
///
/// 已用字节占整个缓冲区的比例超过 `threshold` 时，从第一个输入区域起点到
/// 最后一个输入区域已用部分的末尾整块拷贝一次；否则每个非空输入区域单独拷贝，
/// 避免拷贝稀疏区域之间的填充。
pub fn plan_input_transfers(layout: &Layout, used: &[usize], buffer_size: usize, threshold: f64) -> Vec<Range<usize>> {
    let inputs: Vec<(&Region, usize)> = layout
        .regions()
        .iter()
        .zip(used.iter().copied())
        .filter(|(r, _)| r.direction == Direction::Input)
        .collect();
    let used_bytes: usize = layout
        .regions()
        .iter()
        .zip(used.iter().copied())
        .map(|(r, n)| r.used_range(n).len())
        .sum();
    if used_bytes == 0 || inputs.is_empty() {
        return Vec::new();
    }

    let utilization = used_bytes as f64 / buffer_size.max(1) as f64;
    if utilization > threshold {
        let start = inputs[0].0.offset;
        let (last, n) = inputs[inputs.len() - 1];
        vec![start..last.used_range(n).end]
    } else {
        inputs
            .into_iter()
            .map(|(r, n)| r.used_range(n))
            .filter(|range| !range.is_empty())
            .collect()
    }
}

enum DeviceMemory {
    Unallocated,
    DeviceMapped(DeviceAlloc),
    HostMapped,
}

pub struct AcceleratorBuffer<A: Accelerator, K: BufferKind> {
    device: Arc<A>,
    stream: Option<StreamId>,
    config: BufferConfig,
    size: usize,
    host: AlignedBytes,
    memory: DeviceMemory,
    shape: Shape,
    capacity: Capacity,
    layout: Layout,
    /// 最近一次提交时各区域的已用条目数
    used: Vec<usize>,
    _kind: PhantomData<K>,
}

impl<A: Accelerator, K: BufferKind> AcceleratorBuffer<A, K> {
    /// 在设备上创建缓冲区：创建流、分配主机与设备内存并按 `shape` 划分
    pub fn new(device: Arc<A>, config: BufferConfig, shape: Shape) -> Result<Self> {
        config.validate()?;
        device.set_current()?;
        let stream = device.create_stream()?;
        let mut buffer = Self {
            device,
            stream: Some(stream),
            config,
            size: 0,
            host: AlignedBytes::default(),
            memory: DeviceMemory::Unallocated,
            shape,
            capacity: Capacity::default(),
            layout: Layout::default(),
            used: Vec::new(),
            _kind: PhantomData,
        };
        buffer.allocate(config.size_bytes)?;
        buffer.init(shape);
        log::debug!(
            "device {}: {:?} buffer of {} bytes, capacity {:?}",
            buffer.device.id(),
            K::OPERATION,
            buffer.size,
            buffer.capacity
        );
        Ok(buffer)
    }

    /// 按当前分配大小和新的工作负载形状重新划分区域
    pub fn init(&mut self, shape: Shape) {
        let shape = Shape::new(shape.avg_query_size, shape.candidates_per_query);
        let padding = (K::num_regions() * BUFFER_ALIGN) as f64;
        let usable = (self.size as f64 * self.config.headroom - padding).max(0.0);
        let mut units = (usable / K::bytes_per_candidate(&shape)).floor() as usize;
        loop {
            let capacity = K::capacity(units, &shape);
            let layout = partition(&K::regions(&capacity));
            if layout.total_bytes() <= self.size || units == 0 {
                self.shape = shape;
                self.capacity = capacity;
                self.used = vec![0; layout.regions().len()];
                self.layout = layout;
                return;
            }
            units -= 1;
        }
    }

    /// 保证缓冲区能容纳给定的需求。
    ///
    /// 先按实际需求的形状在当前大小上重新划分；仍放不下时按增长系数估算新的
    /// 字节数，释放旧的主机与设备分配后重新分配并划分。
    pub fn ensure_capacity(&mut self, total_bases: usize, total_queries: usize, total_candidates: usize) -> Result<()> {
        let shape = Shape::from_totals(total_bases, total_queries, total_candidates);
        self.init(shape);
        if self.capacity.covers(total_bases, total_queries, total_candidates) {
            return Ok(());
        }

        let units = total_candidates.max(total_queries.saturating_mul(shape.candidates_per_query));
        let padding = (K::num_regions() * BUFFER_ALIGN) as f64;
        let raw = units as f64 * K::bytes_per_candidate(&shape) * self.config.growth_factor + padding;
        let bytes = (raw / self.config.headroom).ceil() as usize + 1;
        log::info!(
            "device {}: growing {:?} buffer {} -> {} bytes ({} bases, {} queries, {} candidates)",
            self.device.id(),
            K::OPERATION,
            self.size,
            bytes,
            total_bases,
            total_queries,
            total_candidates
        );
        // 旧布局随旧分配一起作废；新分配失败时缓冲区保持空布局
        self.release()?;
        self.allocate(bytes)?;
        self.init(shape);
        Ok(())
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    pub fn device(&self) -> &Arc<A> {
        &self.device
    }

    pub fn is_host_mapped(&self) -> bool {
        matches!(self.memory, DeviceMemory::HostMapped)
    }

    fn find(&self, name: &str) -> Result<&Region> {
        self.layout
            .region(name)
            .ok_or_else(|| FmiError::region(name, "not present in layout"))
    }

    /// 主机侧区域视图
    pub fn region<T: Pod>(&self, name: &str) -> Result<&[T]> {
        let range = self.find(name)?.range();
        bytemuck::try_cast_slice(&self.host.as_bytes()[range]).map_err(|e| FmiError::region(name, e.to_string()))
    }

    pub fn region_mut<T: Pod>(&mut self, name: &str) -> Result<&mut [T]> {
        let range = self.find(name)?.range();
        bytemuck::try_cast_slice_mut(&mut self.host.as_bytes_mut()[range])
            .map_err(|e| FmiError::region(name, e.to_string()))
    }

    /// 提交一次处理：检查容量，传入已用的输入区域，调度内核，排队传回输出区域。
    ///
    /// `used` 按布局顺序给出每个区域的已用条目数。
    pub fn submit(&mut self, used: &[usize], param: u32) -> Result<()> {
        if used.len() != self.layout.regions().len() {
            return Err(FmiError::region(
                "*",
                format!("{} usage counts for {} regions", used.len(), self.layout.regions().len()),
            ));
        }
        for (region, &n) in self.layout.regions().iter().zip(used) {
            if n > region.count {
                return Err(FmiError::CapacityExceeded { region: region.name, requested: n, capacity: region.count });
            }
        }
        self.used = used.to_vec();
        let stream = self.stream()?;
        let launch = Launch { op: K::OPERATION, layout: self.layout.clone(), used: self.used.clone(), param };

        self.device.set_current()?;
        match &self.memory {
            DeviceMemory::HostMapped => {
                self.device.launch(stream, &launch, LaunchTarget::Host(self.host.as_bytes_mut()))?;
            }
            DeviceMemory::DeviceMapped(alloc) => {
                let ranges = plan_input_transfers(&self.layout, &self.used, self.size, self.config.transfer_threshold);
                for range in ranges {
                    let offset = range.start;
                    self.device.copy_to_device_async(stream, alloc, offset, &self.host.as_bytes()[range])?;
                }
                self.device.launch(stream, &launch, LaunchTarget::Device(alloc))?;
                for (region, &n) in self.layout.regions().iter().zip(&self.used) {
                    let range = region.used_range(n);
                    if region.direction == Direction::Output && !range.is_empty() {
                        self.device.copy_to_host_async(stream, alloc, range.start, range.len())?;
                    }
                }
            }
            DeviceMemory::Unallocated => {
                return Err(FmiError::device_op(self.device.id(), "submit", "buffer memory released"));
            }
        }
        Ok(())
    }

    /// 等待本缓冲区的流完成，并把传回的结果写入主机区域
    pub fn receive(&mut self) -> Result<()> {
        let stream = self.stream()?;
        self.device.set_current()?;
        let readbacks = self.device.synchronize(stream)?;
        let host = self.host.as_bytes_mut();
        for rb in readbacks {
            let end = rb.offset + rb.bytes.len();
            if end > host.len() {
                return Err(FmiError::device_op(self.device.id(), "receive", "readback outside host buffer"));
            }
            host[rb.offset..end].copy_from_slice(&rb.bytes);
        }
        Ok(())
    }

    /// 释放主机与设备分配；可重复调用
    pub fn release(&mut self) -> Result<()> {
        self.capacity = Capacity::default();
        self.layout = Layout::default();
        self.used.clear();
        self.release_memory()
    }

    fn stream(&self) -> Result<StreamId> {
        self.stream
            .ok_or_else(|| FmiError::device_op(self.device.id(), "stream", "buffer stream destroyed"))
    }

    fn allocate(&mut self, bytes: usize) -> Result<()> {
        let host = AlignedBytes::zeroed(bytes)?;
        self.memory = match self.device.memory_space() {
            MemorySpace::HostMapped => DeviceMemory::HostMapped,
            MemorySpace::DeviceMapped => {
                self.device.set_current()?;
                DeviceMemory::DeviceMapped(self.device.allocate(bytes)?)
            }
        };
        self.host = host;
        self.size = bytes;
        Ok(())
    }

    fn release_memory(&mut self) -> Result<()> {
        if let DeviceMemory::DeviceMapped(alloc) = std::mem::replace(&mut self.memory, DeviceMemory::Unallocated) {
            self.device.set_current()?;
            self.device.release(alloc)?;
        }
        self.host = AlignedBytes::default();
        self.size = 0;
        Ok(())
    }
}

impl<A: Accelerator, K: BufferKind> Drop for AcceleratorBuffer<A, K> {
    fn drop(&mut self) {
        if let Err(e) = self.release_memory() {
            log::warn!("device {}: failed to release buffer: {}", self.device.id(), e);
        }
        if let Some(stream) = self.stream.take() {
            if let Err(e) = self.device.destroy_stream(stream) {
                log::warn!("device {}: failed to destroy stream: {}", self.device.id(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Kernel, SimDevice};

    fn plain_device(mem: u64) -> Arc<SimDevice> {
        Arc::new(SimDevice::new(0, mem, MemorySpace::DeviceMapped))
    }

    fn small_config(size: usize) -> BufferConfig {
        BufferConfig { size_bytes: size, ..Default::default() }
    }

    #[test]
    fn shape_from_totals_rounds_up() {
        assert_eq!(Shape::from_totals(10, 3, 7), Shape::new(4, 3));
        assert_eq!(Shape::from_totals(0, 0, 0), Shape::new(1, 1));
        assert_eq!(Shape::new(0, 0), Shape::new(1, 1));
    }

    #[test]
    fn plan_merges_dense_inputs() {
        let layout = partition(&[
            RegionSpec::input::<u8>("a", 100),
            RegionSpec::input::<u64>("b", 10),
            RegionSpec::output::<u64>("c", 10),
        ]);
        let size = layout.total_bytes();
        // 稠密：一次整块拷贝
        let plan = plan_input_transfers(&layout, &[100, 10, 10], size, 0.15);
        assert_eq!(plan, vec![0..layout.region("b").unwrap().end()]);

        // 稀疏：逐区域拷贝，跳过空区域
        let plan = plan_input_transfers(&layout, &[3, 1, 1], 1 << 20, 0.15);
        assert_eq!(plan, vec![0..3, 112..120]);
        let plan = plan_input_transfers(&layout, &[3, 0, 0], 1 << 20, 0.15);
        assert_eq!(plan, vec![0..3]);
        assert!(plan_input_transfers(&layout, &[0, 0, 0], size, 0.15).is_empty());
    }

    #[test]
    fn init_fits_within_allocation() {
        let dev = plain_device(1 << 24);
        let mut buf = SearchBuffer::new(dev, small_config(4096), Shape::new(50, 1)).unwrap();
        for shape in [Shape::new(1, 1), Shape::new(7, 3), Shape::new(150, 20), Shape::new(5000, 1)] {
            buf.init(shape);
            assert!(buf.layout().total_bytes() <= buf.size_in_bytes());
        }
    }

    #[test]
    fn ensure_capacity_grows_once() {
        let dev = plain_device(1 << 26);
        let mut buf = KmerBuffer::new(Arc::clone(&dev), small_config(1024), Shape::default()).unwrap();
        assert_eq!(dev.stats().allocations, 1);

        buf.ensure_capacity(100_000, 1000, 20_000).unwrap();
        assert!(buf.capacity().covers(100_000, 1000, 20_000));
        assert_eq!(dev.stats().allocations, 2);
        assert_eq!(dev.stats().releases, 1);
        assert_eq!(dev.live_allocations(), 1);

        // 相同需求再次调用不重新分配
        let size = buf.size_in_bytes();
        buf.ensure_capacity(100_000, 1000, 20_000).unwrap();
        assert_eq!(buf.size_in_bytes(), size);
        assert_eq!(dev.stats().allocations, 2);
    }

    #[test]
    fn ensure_capacity_grows_when_any_limit_is_exceeded() {
        let dev = plain_device(1 << 26);
        let mut buf = SearchBuffer::new(Arc::clone(&dev), small_config(2048), Shape::new(10, 1)).unwrap();
        // 碱基数超限而种子数不超限
        buf.ensure_capacity(50_000, 2, 2).unwrap();
        assert!(buf.capacity().covers(50_000, 2, 2));
        assert!(buf.size_in_bytes() > 2048);
    }

    #[test]
    fn failed_growth_leaves_an_empty_buffer() {
        let dev = plain_device(1 << 16);
        let mut buf = KmerBuffer::new(Arc::clone(&dev), small_config(4096), Shape::default()).unwrap();
        assert!(buf.max_candidates() > 0);

        // 设备预算放不下扩容后的大小
        let err = buf.ensure_capacity(10, 1, 1 << 20).unwrap_err();
        assert!(matches!(err, FmiError::DeviceAlloc { .. }), "{}", err);
        assert_eq!(buf.capacity(), Capacity::default());
        assert_eq!(buf.size_in_bytes(), 0);
        assert!(buf.candidates_mut().is_err());
        assert!(buf.alignments().is_err());
        assert!(buf.send(0, 0, 1, 1).is_err());
        assert_eq!(dev.live_allocations(), 0);

        // 主机分配失败同样不留下旧布局
        let err = buf.ensure_capacity(10, 1, 1 << 58).unwrap_err();
        assert!(matches!(err, FmiError::HostAlloc { .. }), "{}", err);
        assert!(buf.candidates_mut().is_err());

        // 之后仍可按可满足的需求重新扩容
        buf.ensure_capacity(100, 2, 64).unwrap();
        assert!(buf.capacity().covers(100, 2, 64));
        assert_eq!(buf.candidates_mut().unwrap().len(), buf.max_candidates());
    }

    #[test]
    fn oversized_submit_is_rejected() {
        let dev = plain_device(1 << 20);
        let mut buf = DecodeBuffer::new(dev, small_config(1024), Shape::default()).unwrap();
        let cap = buf.max_positions();
        let err = buf.send(cap + 1, 4).unwrap_err();
        assert!(matches!(err, FmiError::CapacityExceeded { region: "init_positions", .. }));
    }

    #[test]
    fn release_is_idempotent_and_drop_cleans_up() {
        let dev = plain_device(1 << 20);
        {
            let mut buf = DecodeBuffer::new(Arc::clone(&dev), small_config(1024), Shape::default()).unwrap();
            buf.release().unwrap();
            buf.release().unwrap();
            assert!(buf.send(1, 4).is_err());
        }
        assert_eq!(dev.live_allocations(), 0);

        {
            let _buf = DecodeBuffer::new(Arc::clone(&dev), small_config(1024), Shape::default()).unwrap();
            assert_eq!(dev.live_allocations(), 1);
        }
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn device_set_current_before_each_call() {
        let kernel: Arc<dyn Kernel> = Arc::new(|_: &Launch, _: &mut [u8]| -> Result<()> { Ok(()) });
        let dev =
            Arc::new(SimDevice::new(0, 1 << 20, MemorySpace::DeviceMapped).with_kernel(Operation::Decode, kernel));
        let mut buf = DecodeBuffer::new(Arc::clone(&dev), small_config(1024), Shape::default()).unwrap();
        let before = dev.stats().set_current_calls;
        buf.send(1, 4).unwrap();
        buf.receive().unwrap();
        assert_eq!(dev.stats().set_current_calls, before + 2);
    }

    #[test]
    fn host_mapped_buffer_never_copies() {
        let kernel: Arc<dyn Kernel> = Arc::new(|_: &Launch, _: &mut [u8]| -> Result<()> { Ok(()) });
        let dev = Arc::new(SimDevice::new(0, 0, MemorySpace::HostMapped).with_kernel(Operation::Decode, kernel));
        let mut buf = DecodeBuffer::new(Arc::clone(&dev), small_config(1024), Shape::default()).unwrap();
        assert!(buf.is_host_mapped());
        buf.send(3, 4).unwrap();
        buf.receive().unwrap();
        let stats = dev.stats();
        assert_eq!(stats.allocations, 0);
        assert_eq!(stats.h2d_copies + stats.d2h_copies, 0);
        assert_eq!(stats.launches, 1);
    }
}
