//! 索引结构在各设备上的副本与生命周期。
//!
//! 打包索引、FMI 表与采样 SA 在主机上构建一次，只读共享；`transfer` 把它们
//! 复制到每个参与的设备。主机映射模式的设备不分配内存，直接使用主机数据。
//!
//! 释放顺序固定为：主机数据 -> 设备分配 -> 记录信息，每一步都可重复调用。

use std::sync::Arc;

use crate::device::{Accelerator, DeviceAlloc, MemorySpace};
use crate::error::{FmiError, Result};
use crate::index::{FmiTable, PackedIndex, SampledSa};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    Index,
    Table,
    SampledSa,
}

impl Structure {
    pub const ALL: [Structure; 3] = [Structure::Index, Structure::Table, Structure::SampledSa];

    pub fn name(self) -> &'static str {
        match self {
            Structure::Index => "packed index",
            Structure::Table => "FMI table",
            Structure::SampledSa => "sampled SA",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// 某个结构在某个设备上的状态
#[derive(Debug, Default)]
pub enum Replica {
    #[default]
    Unallocated,
    /// 设备上的独立分配，每段一个
    DeviceMapped(Vec<DeviceAlloc>),
    /// 设备直接访问主机数据
    HostMapped,
}

impl Replica {
    pub fn is_unallocated(&self) -> bool {
        matches!(self, Replica::Unallocated)
    }
}

pub struct DeviceIndex<A: Accelerator> {
    devices: Vec<Arc<A>>,
    index: Option<Arc<PackedIndex>>,
    table: Option<Arc<FmiTable>>,
    sa: Option<Arc<SampledSa>>,
    /// `replicas[device][structure]`
    replicas: Vec<[Replica; 3]>,
}

impl<A: Accelerator> DeviceIndex<A> {
    pub fn new(
        devices: Vec<Arc<A>>,
        index: Arc<PackedIndex>,
        table: Option<Arc<FmiTable>>,
        sa: Option<Arc<SampledSa>>,
    ) -> Self {
        Self { devices, index: Some(index), table, sa, replicas: Vec::new() }
    }

    pub fn devices(&self) -> &[Arc<A>] {
        &self.devices
    }

    pub fn index(&self) -> Option<&Arc<PackedIndex>> {
        self.index.as_ref()
    }

    pub fn table(&self) -> Option<&Arc<FmiTable>> {
        self.table.as_ref()
    }

    pub fn sampled_sa(&self) -> Option<&Arc<SampledSa>> {
        self.sa.as_ref()
    }

    pub fn replica(&self, device: usize, structure: Structure) -> Option<&Replica> {
        self.replicas.get(device).map(|r| &r[structure.slot()])
    }

    /// 设备上所有已加载的结构都已完成复制
    pub fn is_replicated(&self, device: usize) -> bool {
        self.replicas.get(device).is_some_and(|r| {
            Structure::ALL
                .iter()
                .all(|&s| self.segments(s).is_none() || !r[s.slot()].is_unallocated())
        })
    }

    /// 主机侧各结构的总字节数
    pub fn size_in_bytes(&self) -> usize {
        Structure::ALL
            .iter()
            .filter_map(|&s| self.segments(s))
            .map(|segs| segs.iter().map(|b| b.len()).sum::<usize>())
            .sum()
    }

    fn segments(&self, structure: Structure) -> Option<Vec<&[u8]>> {
        match structure {
            Structure::Index => self.index.as_ref().map(|i| vec![i.entry_bytes()]),
            Structure::Table => self.table.as_ref().map(|t| vec![t.offsets_bytes(), t.body_bytes()]),
            Structure::SampledSa => self.sa.as_ref().map(|s| vec![s.entry_bytes()]),
        }
    }

    fn ensure_replicas(&mut self) {
        self.replicas.resize_with(self.devices.len(), Default::default);
    }

    /// 把主机数据复制到所有设备。
    ///
    /// 每个设备先检查剩余内存是否足够容纳尚未复制的结构，不足时在任何拷贝
    /// 之前失败。设备 k 失败时，设备 0..k-1 保持已复制状态，设备 k 上本次
    /// 的分配全部释放。已复制的结构会被跳过。
    pub fn transfer(&mut self) -> Result<()> {
        self.ensure_replicas();
        for d in 0..self.devices.len() {
            self.transfer_device(d)?;
        }
        Ok(())
    }

    fn transfer_device(&mut self, d: usize) -> Result<()> {
        let device = Arc::clone(&self.devices[d]);
        let pending: Vec<(Structure, Vec<&[u8]>)> = Structure::ALL
            .iter()
            .filter(|&&s| self.replicas[d][s.slot()].is_unallocated())
            .filter_map(|&s| self.segments(s).map(|segs| (s, segs)))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        if device.memory_space() == MemorySpace::HostMapped {
            let done: Vec<Structure> = pending.iter().map(|(s, _)| *s).collect();
            for s in done {
                self.replicas[d][s.slot()] = Replica::HostMapped;
            }
            log::debug!("device {}: using host-mapped index data", device.id());
            return Ok(());
        }

        device.set_current()?;
        let required: u64 = pending
            .iter()
            .flat_map(|(_, segs)| segs.iter().map(|b| b.len() as u64))
            .sum();
        let free = device.free_memory()?;
        if free <= required {
            let what = match pending.as_slice() {
                [(s, _)] => s.name(),
                _ => "index structures",
            };
            return Err(FmiError::InsufficientDeviceMemory { device: device.id(), what, required, free });
        }

        let mut owned: Vec<(Structure, DeviceAlloc)> = Vec::new();
        let mut failure = None;
        'copy: for (s, segs) in &pending {
            for bytes in segs {
                match device.allocate(bytes.len()) {
                    Ok(alloc) => {
                        let copy = device.copy_to_device(&alloc, 0, bytes);
                        owned.push((*s, alloc));
                        if let Err(e) = copy {
                            failure = Some(e);
                            break 'copy;
                        }
                    }
                    Err(e) => {
                        failure = Some(e);
                        break 'copy;
                    }
                }
            }
        }

        if let Some(e) = failure {
            for (_, alloc) in owned {
                if let Err(re) = device.release(alloc) {
                    log::warn!("device {}: release after failed transfer: {}", device.id(), re);
                }
            }
            return Err(e);
        }

        for (s, alloc) in owned {
            match &mut self.replicas[d][s.slot()] {
                Replica::DeviceMapped(allocs) => allocs.push(alloc),
                slot => *slot = Replica::DeviceMapped(vec![alloc]),
            }
        }
        log::info!("device {}: replicated {} bytes of index data", device.id(), required);
        Ok(())
    }

    /// 释放主机数据；仍有设备以主机映射方式引用时不释放，返回是否已释放
    pub fn free_host(&mut self) -> bool {
        let referenced = self
            .replicas
            .iter()
            .flatten()
            .any(|r| matches!(r, Replica::HostMapped));
        if referenced {
            return false;
        }
        self.index = None;
        self.table = None;
        self.sa = None;
        true
    }

    /// 释放各设备上自有的分配；未分配与主机映射的状态跳过
    pub fn free_device(&mut self) -> Result<()> {
        let mut first_err = None;
        for (device, replicas) in self.devices.iter().zip(self.replicas.iter_mut()) {
            for replica in replicas.iter_mut() {
                if !matches!(replica, Replica::DeviceMapped(_)) {
                    continue;
                }
                if let Replica::DeviceMapped(allocs) = std::mem::take(replica) {
                    if let Err(e) = device.set_current() {
                        first_err.get_or_insert(e);
                    }
                    for alloc in allocs {
                        if let Err(e) = device.release(alloc) {
                            first_err.get_or_insert(e);
                        }
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 清除每个设备的副本记录
    pub fn free_metainfo(&mut self) {
        self.replicas.clear();
    }

    pub fn teardown(&mut self) -> Result<()> {
        self.free_host();
        self.free_device()?;
        self.free_metainfo();
        Ok(())
    }
}

impl<A: Accelerator> Drop for DeviceIndex<A> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::warn!("failed to tear down device index: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimDevice;
    use crate::index::testutil;

    fn host_data() -> (Arc<PackedIndex>, Arc<FmiTable>, Arc<SampledSa>) {
        let (sa, idx) = testutil::build_index(&testutil::make_text(1000, 9));
        let table = FmiTable::build(&idx, 4, 3).unwrap();
        let sa = SampledSa::from_sa(&sa, 4).unwrap();
        (Arc::new(idx), Arc::new(table), Arc::new(sa))
    }

    fn device_index(devices: Vec<Arc<SimDevice>>) -> DeviceIndex<SimDevice> {
        let (idx, table, sa) = host_data();
        DeviceIndex::new(devices, idx, Some(table), Some(sa))
    }

    fn sim(id: u32, mem: u64) -> Arc<SimDevice> {
        Arc::new(SimDevice::new(id, mem, MemorySpace::DeviceMapped))
    }

    #[test]
    fn replicates_to_every_device() {
        let devs = vec![sim(0, 1 << 20), sim(1, 1 << 20)];
        let mut di = device_index(devs.clone());
        di.transfer().unwrap();
        for (d, dev) in devs.iter().enumerate() {
            assert!(di.is_replicated(d));
            // 索引 1 段 + 表 2 段 + SA 1 段
            assert_eq!(dev.live_allocations(), 4);
            if let Some(Replica::DeviceMapped(allocs)) = di.replica(d, Structure::Table) {
                let body = dev.read_alloc(&allocs[1]).unwrap();
                assert_eq!(body, di.table().unwrap().body_bytes());
            } else {
                panic!("table not device mapped");
            }
        }
        let copies = devs[0].stats().h2d_copies;
        di.transfer().unwrap();
        assert_eq!(devs[0].stats().h2d_copies, copies);

        di.teardown().unwrap();
        di.teardown().unwrap();
        assert!(devs.iter().all(|d| d.live_allocations() == 0));
        assert!(di.index().is_none());
    }

    #[test]
    fn insufficient_memory_leaves_earlier_devices_replicated() {
        let di_size = device_index(vec![]).size_in_bytes() as u64;
        // 恰好等于所需字节数也视为不足
        let devs = vec![sim(0, 1 << 20), sim(1, di_size), sim(2, 1 << 20)];
        let mut di = device_index(devs.clone());
        let err = di.transfer().unwrap_err();
        assert!(matches!(err, FmiError::InsufficientDeviceMemory { device: 1, .. }), "{}", err);
        assert!(di.is_replicated(0));
        assert!(!di.is_replicated(1));
        assert!(!di.is_replicated(2));
        assert_eq!(devs[1].stats().allocations, 0);
        assert_eq!(devs[1].stats().h2d_copies, 0);

        di.teardown().unwrap();
        assert!(devs.iter().all(|d| d.live_allocations() == 0));
    }

    #[test]
    fn failed_copy_releases_device_allocations() {
        let bad = Arc::new(SimDevice::new(1, 1 << 20, MemorySpace::DeviceMapped).fail_on("copy_to_device"));
        let devs = vec![sim(0, 1 << 20), Arc::clone(&bad)];
        let mut di = device_index(devs);
        assert!(matches!(di.transfer(), Err(FmiError::DeviceOperation { device: 1, .. })));
        assert_eq!(bad.live_allocations(), 0);
        assert!(di.replica(1, Structure::Index).unwrap().is_unallocated());

        let bad = Arc::new(SimDevice::new(0, 1 << 20, MemorySpace::DeviceMapped).fail_on("allocate"));
        let mut di = device_index(vec![Arc::clone(&bad)]);
        assert!(matches!(di.transfer(), Err(FmiError::DeviceAlloc { device: 0, .. })));
        assert_eq!(bad.live_allocations(), 0);
    }

    #[test]
    fn host_mapped_device_aliases_host_data() {
        let host_dev = Arc::new(SimDevice::new(1, 0, MemorySpace::HostMapped));
        let devs = vec![sim(0, 1 << 20), Arc::clone(&host_dev)];
        let mut di = device_index(devs.clone());
        di.transfer().unwrap();
        assert!(matches!(di.replica(1, Structure::Index), Some(Replica::HostMapped)));
        assert_eq!(host_dev.stats().allocations, 0);

        // 仍被主机映射设备引用，主机数据不释放
        assert!(!di.free_host());
        assert!(di.index().is_some());
        di.free_device().unwrap();
        assert_eq!(devs[0].live_allocations(), 0);
        assert!(matches!(di.replica(1, Structure::Table), Some(Replica::HostMapped)));
        di.free_metainfo();
        assert!(di.free_host());
        di.teardown().unwrap();
    }

    #[test]
    fn index_only_replication() {
        let (idx, _, _) = host_data();
        let dev = sim(0, 1 << 20);
        let mut di = DeviceIndex::new(vec![Arc::clone(&dev)], Arc::clone(&idx), None, None);
        assert_eq!(di.size_in_bytes(), idx.size_in_bytes());
        di.transfer().unwrap();
        assert!(di.is_replicated(0));
        assert_eq!(dev.live_allocations(), 1);
        drop(di);
        assert_eq!(dev.live_allocations(), 0);
    }
}
