//! 进程内模拟加速器。
//!
//! 设备内存是 16 字节对齐的主机分配，流是按提交顺序排队的操作队列，
//! 在 `synchronize` 时依次执行。内核按 [`Operation`] 注册。
//! 用于没有真实硬件时运行搜索，也用于测试传输计划与副本生命周期。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::device::{
    Accelerator, DeviceAlloc, DeviceId, Kernel, Launch, LaunchTarget, MemorySpace, Operation, Readback, StreamId,
};
use crate::error::{FmiError, Result};
use crate::util::aligned::AlignedBytes;

/// 模拟设备上发生过的操作计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub allocations: usize,
    pub releases: usize,
    /// 主机->设备拷贝次数（同步 + 异步）
    pub h2d_copies: usize,
    pub h2d_bytes: usize,
    pub d2h_copies: usize,
    pub d2h_bytes: usize,
    pub launches: usize,
    pub set_current_calls: usize,
}

enum Pending {
    CopyIn { handle: u64, offset: usize, bytes: Vec<u8> },
    Launch { handle: u64, launch: Launch },
    CopyOut { handle: u64, offset: usize, len: usize },
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    next_stream: u32,
    allocations: HashMap<u64, AlignedBytes>,
    used_memory: u64,
    streams: HashMap<u32, VecDeque<Pending>>,
    stats: SimStats,
}

pub struct SimDevice {
    id: DeviceId,
    space: MemorySpace,
    total_memory: u64,
    kernels: HashMap<Operation, Arc<dyn Kernel>>,
    /// 注入失败的操作名（"allocate"、"copy_to_device" 等）
    failing: HashSet<&'static str>,
    state: Mutex<SimState>,
}

impl SimDevice {
    pub fn new(id: DeviceId, total_memory: u64, space: MemorySpace) -> Self {
        Self {
            id,
            space,
            total_memory,
            kernels: HashMap::new(),
            failing: HashSet::new(),
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_kernel(mut self, op: Operation, kernel: Arc<dyn Kernel>) -> Self {
        self.kernels.insert(op, kernel);
        self
    }

    /// 让指定操作此后总是失败
    pub fn fail_on(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn stats(&self) -> SimStats {
        self.state().map(|s| s.stats.clone()).unwrap_or_default()
    }

    /// 当前存活的分配数
    pub fn live_allocations(&self) -> usize {
        self.state().map(|s| s.allocations.len()).unwrap_or(0)
    }

    /// 读取一块分配的内容（测试与诊断用）
    pub fn read_alloc(&self, alloc: &DeviceAlloc) -> Result<Vec<u8>> {
        let state = self.state()?;
        let mem = self.memory(&state, alloc.handle, "read")?;
        Ok(mem.as_bytes().to_vec())
    }

    fn state(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| FmiError::device_op(self.id, "lock", "device state poisoned"))
    }

    fn check(&self, op: &'static str) -> Result<()> {
        if self.failing.contains(op) {
            return Err(FmiError::device_op(self.id, op, "injected failure"));
        }
        Ok(())
    }

    fn memory<'s>(&self, state: &'s SimState, handle: u64, op: &'static str) -> Result<&'s AlignedBytes> {
        state
            .allocations
            .get(&handle)
            .ok_or_else(|| FmiError::device_op(self.id, op, format!("unknown allocation {}", handle)))
    }

    fn memory_mut<'s>(&self, state: &'s mut SimState, handle: u64, op: &'static str) -> Result<&'s mut AlignedBytes> {
        state
            .allocations
            .get_mut(&handle)
            .ok_or_else(|| FmiError::device_op(self.id, op, format!("unknown allocation {}", handle)))
    }

    fn queue<'s>(
        &self,
        state: &'s mut SimState,
        stream: StreamId,
        op: &'static str,
    ) -> Result<&'s mut VecDeque<Pending>> {
        state
            .streams
            .get_mut(&stream.0)
            .ok_or_else(|| FmiError::device_op(self.id, op, format!("unknown stream {}", stream.0)))
    }

    fn kernel(&self, op: Operation) -> Result<&Arc<dyn Kernel>> {
        self.kernels
            .get(&op)
            .ok_or_else(|| FmiError::device_op(self.id, "launch", format!("no kernel registered for {:?}", op)))
    }

    fn range_check(&self, op: &'static str, offset: usize, len: usize, size: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(FmiError::device_op(
                self.id,
                op,
                format!("range {}+{} outside allocation of {} bytes", offset, len, size),
            )),
        }
    }

    fn write(&self, state: &mut SimState, handle: u64, offset: usize, bytes: &[u8], op: &'static str) -> Result<()> {
        let mem = self.memory_mut(state, handle, op)?;
        self.range_check(op, offset, bytes.len(), mem.len())?;
        mem.as_bytes_mut()[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Accelerator for SimDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn memory_space(&self) -> MemorySpace {
        self.space
    }

    fn free_memory(&self) -> Result<u64> {
        self.check("free_memory")?;
        let state = self.state()?;
        Ok(self.total_memory.saturating_sub(state.used_memory))
    }

    fn set_current(&self) -> Result<()> {
        self.check("set_current")?;
        self.state()?.stats.set_current_calls += 1;
        Ok(())
    }

    fn create_stream(&self) -> Result<StreamId> {
        self.check("create_stream")?;
        let mut state = self.state()?;
        let id = state.next_stream;
        state.next_stream += 1;
        state.streams.insert(id, VecDeque::new());
        Ok(StreamId(id))
    }

    fn destroy_stream(&self, stream: StreamId) -> Result<()> {
        let mut state = self.state()?;
        match state.streams.remove(&stream.0) {
            Some(_) => Ok(()),
            None => Err(FmiError::device_op(self.id, "destroy_stream", format!("unknown stream {}", stream.0))),
        }
    }

    fn allocate(&self, bytes: usize) -> Result<DeviceAlloc> {
        let mut state = self.state()?;
        let free = self.total_memory.saturating_sub(state.used_memory);
        if self.failing.contains("allocate") || bytes as u64 > free {
            return Err(FmiError::DeviceAlloc { device: self.id, bytes });
        }
        let mem = AlignedBytes::zeroed(bytes).map_err(|_| FmiError::DeviceAlloc { device: self.id, bytes })?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.allocations.insert(handle, mem);
        state.used_memory += bytes as u64;
        state.stats.allocations += 1;
        Ok(DeviceAlloc { handle, bytes })
    }

    fn release(&self, alloc: DeviceAlloc) -> Result<()> {
        self.check("release")?;
        let mut state = self.state()?;
        match state.allocations.remove(&alloc.handle) {
            Some(mem) => {
                state.used_memory -= mem.len() as u64;
                state.stats.releases += 1;
                Ok(())
            }
            None => Err(FmiError::device_op(self.id, "release", format!("unknown allocation {}", alloc.handle))),
        }
    }

    fn copy_to_device(&self, dst: &DeviceAlloc, offset: usize, src: &[u8]) -> Result<()> {
        self.check("copy_to_device")?;
        let mut state = self.state()?;
        self.write(&mut state, dst.handle, offset, src, "copy_to_device")?;
        state.stats.h2d_copies += 1;
        state.stats.h2d_bytes += src.len();
        Ok(())
    }

    fn copy_to_device_async(&self, stream: StreamId, dst: &DeviceAlloc, offset: usize, src: &[u8]) -> Result<()> {
        self.check("copy_to_device")?;
        let mut state = self.state()?;
        let size = self.memory(&state, dst.handle, "copy_to_device_async")?.len();
        self.range_check("copy_to_device_async", offset, src.len(), size)?;
        self.queue(&mut state, stream, "copy_to_device_async")?
            .push_back(Pending::CopyIn { handle: dst.handle, offset, bytes: src.to_vec() });
        state.stats.h2d_copies += 1;
        state.stats.h2d_bytes += src.len();
        Ok(())
    }

    fn copy_to_host_async(&self, stream: StreamId, src: &DeviceAlloc, offset: usize, len: usize) -> Result<()> {
        self.check("copy_to_host")?;
        let mut state = self.state()?;
        let size = self.memory(&state, src.handle, "copy_to_host_async")?.len();
        self.range_check("copy_to_host_async", offset, len, size)?;
        self.queue(&mut state, stream, "copy_to_host_async")?
            .push_back(Pending::CopyOut { handle: src.handle, offset, len });
        state.stats.d2h_copies += 1;
        state.stats.d2h_bytes += len;
        Ok(())
    }

    fn launch(&self, stream: StreamId, launch: &Launch, target: LaunchTarget<'_>) -> Result<()> {
        self.check("launch")?;
        let kernel = self.kernel(launch.op)?;
        match target {
            // 主机映射：内核直接在主机内存上执行
            LaunchTarget::Host(memory) => {
                {
                    let mut state = self.state()?;
                    self.queue(&mut state, stream, "launch")?;
                }
                kernel.run(launch, memory)?;
                self.state()?.stats.launches += 1;
                Ok(())
            }
            LaunchTarget::Device(alloc) => {
                let mut state = self.state()?;
                self.memory(&state, alloc.handle, "launch")?;
                self.queue(&mut state, stream, "launch")?
                    .push_back(Pending::Launch { handle: alloc.handle, launch: launch.clone() });
                state.stats.launches += 1;
                Ok(())
            }
        }
    }

    fn synchronize(&self, stream: StreamId) -> Result<Vec<Readback>> {
        self.check("synchronize")?;
        let mut state = self.state()?;
        let pending: Vec<Pending> = self.queue(&mut state, stream, "synchronize")?.drain(..).collect();
        let mut readbacks = Vec::new();
        for op in pending {
            match op {
                Pending::CopyIn { handle, offset, bytes } => {
                    self.write(&mut state, handle, offset, &bytes, "synchronize")?;
                }
                Pending::Launch { handle, launch } => {
                    let kernel = self.kernel(launch.op)?;
                    let mem = self.memory_mut(&mut state, handle, "synchronize")?;
                    kernel.run(&launch, mem.as_bytes_mut())?;
                }
                Pending::CopyOut { handle, offset, len } => {
                    let mem = self.memory(&state, handle, "synchronize")?;
                    readbacks.push(Readback { offset, bytes: mem.as_bytes()[offset..offset + len].to_vec() });
                }
            }
        }
        Ok(readbacks)
    }
}
