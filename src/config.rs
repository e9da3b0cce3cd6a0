//! 运行参数。默认值与命令行参数一一对应，构建后统一经 `validate` 检查。

use serde::{Deserialize, Serialize};

use crate::error::{FmiError, Result};
use crate::index::table::{DEFAULT_LEVELS, DEFAULT_SKIP_LEVELS, MAX_LEVELS, MIN_LEVELS};

/// 单个加速器缓冲区的参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// 初始分配大小（字节）
    pub size_bytes: usize,
    /// 布局计算时可用的比例，预留给对齐填充
    pub headroom: f64,
    /// 已用字节占比超过该值时整块传输，否则逐区域传输
    pub transfer_threshold: f64,
    /// 扩容时的增长系数（>= 1）
    pub growth_factor: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size_bytes: 4 << 20,
            headroom: 0.95,
            transfer_threshold: 0.15,
            growth_factor: 2.0,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size_bytes == 0 {
            return Err(FmiError::Config("buffer size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.headroom) || self.headroom == 0.0 {
            return Err(FmiError::Config(format!("headroom {} not in (0, 1]", self.headroom)));
        }
        if !(0.0..=1.0).contains(&self.transfer_threshold) {
            return Err(FmiError::Config(format!(
                "transfer threshold {} not in [0, 1]",
                self.transfer_threshold
            )));
        }
        if self.growth_factor.is_nan() || self.growth_factor < 1.0 {
            return Err(FmiError::Config(format!("growth factor {} is below 1", self.growth_factor)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FmiConfig {
    pub sampling_rate: u64,
    pub num_devices: usize,
    pub table_levels: u32,
    pub skip_levels: u32,
    pub buffer: BufferConfig,
}

impl Default for FmiConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 4,
            num_devices: 1,
            table_levels: DEFAULT_LEVELS,
            skip_levels: DEFAULT_SKIP_LEVELS,
            buffer: BufferConfig::default(),
        }
    }
}

impl FmiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_rate == 0 {
            return Err(FmiError::Config("SA sampling rate must be positive".into()));
        }
        if self.num_devices == 0 {
            return Err(FmiError::Config("at least one device is required".into()));
        }
        if !(MIN_LEVELS..=MAX_LEVELS).contains(&self.table_levels) {
            return Err(FmiError::Config(format!(
                "table levels {} not in [{}, {}]",
                self.table_levels, MIN_LEVELS, MAX_LEVELS
            )));
        }
        if self.skip_levels >= self.table_levels {
            return Err(FmiError::Config(format!(
                "skip levels {} must be below table levels {}",
                self.skip_levels, self.table_levels
            )));
        }
        self.buffer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = FmiConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.sampling_rate, 4);
        assert_eq!(cfg.table_levels, 11);
        assert_eq!(cfg.skip_levels, 10);
        assert_eq!(cfg.buffer.transfer_threshold, 0.15);
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = FmiConfig { sampling_rate: 0, ..Default::default() };
        assert!(cfg.validate().is_err());
        cfg.sampling_rate = 4;
        cfg.table_levels = 1;
        assert!(cfg.validate().is_err());
        cfg.table_levels = 5;
        cfg.skip_levels = 5;
        assert!(cfg.validate().is_err());
        cfg.skip_levels = 4;
        cfg.validate().unwrap();

        let mut buf = BufferConfig { growth_factor: 0.5, ..Default::default() };
        assert!(buf.validate().is_err());
        buf.growth_factor = 1.0;
        buf.headroom = 0.0;
        assert!(buf.validate().is_err());
        buf.headroom = 1.0;
        buf.transfer_threshold = f64::NAN;
        assert!(buf.validate().is_err());
    }
}
