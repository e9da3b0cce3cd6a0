//! 库内统一错误类型。
//!
//! 所有核心操作返回 [`Result`]，不做本地恢复；失败向上传播给调用方
//! （批次驱动层决定是否重试）。

use thiserror::Error;

use crate::device::DeviceId;

pub type Result<T> = std::result::Result<T, FmiError>;

#[derive(Error, Debug)]
pub enum FmiError {
    /// 主机内存分配失败
    #[error("host allocation of {bytes} bytes failed")]
    HostAlloc { bytes: usize },

    /// 设备内存分配失败
    #[error("device {device}: allocation of {bytes} bytes failed")]
    DeviceAlloc { device: DeviceId, bytes: usize },

    /// 传输前检查发现设备剩余内存不足（不会进行任何部分拷贝）
    #[error("device {device}: {required} bytes required for {what}, only {free} bytes free")]
    InsufficientDeviceMemory {
        device: DeviceId,
        what: &'static str,
        required: u64,
        free: u64,
    },

    #[error("short read while reading {what}")]
    ShortRead { what: &'static str },

    #[error("short write while writing {what}")]
    ShortWrite { what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FMI 表层数低于结构下限，或与文件中的元素数不一致
    #[error("incompatible FMI table size: {0}")]
    IncompatibleTableSize(String),

    /// 外部设备层（传输、内核调度、同步）返回的失败
    #[error("device {device}: {op} failed: {reason}")]
    DeviceOperation {
        device: DeviceId,
        op: &'static str,
        reason: String,
    },

    /// 提交的条目数超过当前布局容量
    #[error("{region}: {requested} items requested, capacity is {capacity}")]
    CapacityExceeded {
        region: &'static str,
        requested: usize,
        capacity: usize,
    },

    /// 布局中缺少区域，或区域字节无法按元素类型解释
    #[error("buffer region {region}: {reason}")]
    Region { region: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl FmiError {
    pub(crate) fn device_op(device: DeviceId, op: &'static str, reason: impl Into<String>) -> Self {
        FmiError::DeviceOperation { device, op, reason: reason.into() }
    }

    pub(crate) fn region(region: &str, reason: impl Into<String>) -> Self {
        FmiError::Region { region: region.to_string(), reason: reason.into() }
    }

    /// 将 `read_exact` 的 EOF 归类为短读，其余 I/O 错误原样保留
    pub(crate) fn from_read(err: std::io::Error, what: &'static str) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => FmiError::ShortRead { what },
            _ => FmiError::Io(err),
        }
    }

    pub(crate) fn from_write(err: std::io::Error, what: &'static str) -> Self {
        match err.kind() {
            std::io::ErrorKind::WriteZero => FmiError::ShortWrite { what },
            _ => FmiError::Io(err),
        }
    }
}
