//! 加速器设备抽象。
//!
//! 设备枚举、剩余内存上报以及内核本体都属于外部实现；核心只通过
//! [`Accelerator`] 使用它们。每个流上的操作按提交顺序执行，
//! 唯一的阻塞点是 [`Accelerator::synchronize`]。

use crate::buffer::layout::Layout;
use crate::error::Result;

pub mod host_kernel;
pub mod sim;

pub use host_kernel::HostSearchKernel;
pub use sim::{SimDevice, SimStats};

pub type DeviceId = u32;

/// 设备访问数据的方式：独立的设备分配，或直接映射锁页主机内存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    DeviceMapped,
    HostMapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u32);

/// 一块设备内存分配；不可复制，释放时交还给设备
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceAlloc {
    pub handle: u64,
    pub bytes: usize,
}

/// 缓冲区承载的处理单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Search,
    Decode,
    KmerFilter,
}

/// 一次内核调度的描述：布局 + 每个区域实际使用的条目数 + 额外参数
/// （decode 的采样率、k-mer 过滤的最大错误数）
#[derive(Debug, Clone, PartialEq)]
pub struct Launch {
    pub op: Operation,
    pub layout: Layout,
    pub used: Vec<usize>,
    pub param: u32,
}

impl Launch {
    /// 按名称取区域实际使用的条目数
    pub fn used_of(&self, name: &str) -> usize {
        self.layout
            .regions()
            .iter()
            .position(|r| r.name == name)
            .and_then(|i| self.used.get(i).copied())
            .unwrap_or(0)
    }
}

/// 设备内核：在按 `launch.layout` 划分的设备内存上执行一次处理
pub trait Kernel: Send + Sync {
    fn run(&self, launch: &Launch, memory: &mut [u8]) -> Result<()>;
}

impl<F> Kernel for F
where
    F: Fn(&Launch, &mut [u8]) -> Result<()> + Send + Sync,
{
    fn run(&self, launch: &Launch, memory: &mut [u8]) -> Result<()> {
        self(launch, memory)
    }
}

/// 内核访问的内存：设备分配，或主机映射模式下的主机内存本身
pub enum LaunchTarget<'a> {
    Device(&'a DeviceAlloc),
    Host(&'a mut [u8]),
}

/// 同步后交付给主机的设备->主机拷贝结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readback {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

pub trait Accelerator: Send + Sync {
    fn id(&self) -> DeviceId;

    fn memory_space(&self) -> MemorySpace;

    /// 设备当前剩余内存（字节）
    fn free_memory(&self) -> Result<u64>;

    /// 将本设备设为当前线程的上下文；每次传输或调度前都要调用
    fn set_current(&self) -> Result<()>;

    fn create_stream(&self) -> Result<StreamId>;

    fn destroy_stream(&self, stream: StreamId) -> Result<()>;

    fn allocate(&self, bytes: usize) -> Result<DeviceAlloc>;

    fn release(&self, alloc: DeviceAlloc) -> Result<()>;

    /// 同步拷贝，返回时数据已在设备上
    fn copy_to_device(&self, dst: &DeviceAlloc, offset: usize, src: &[u8]) -> Result<()>;

    fn copy_to_device_async(&self, stream: StreamId, dst: &DeviceAlloc, offset: usize, src: &[u8]) -> Result<()>;

    /// 排队一个设备->主机拷贝，结果在 `synchronize` 时交付
    fn copy_to_host_async(&self, stream: StreamId, src: &DeviceAlloc, offset: usize, len: usize) -> Result<()>;

    fn launch(&self, stream: StreamId, launch: &Launch, target: LaunchTarget<'_>) -> Result<()>;

    /// 等待流上所有操作完成，按提交顺序返回设备->主机拷贝的数据
    fn synchronize(&self, stream: StreamId) -> Result<Vec<Readback>>;
}
