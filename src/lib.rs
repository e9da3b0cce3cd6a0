//! # fmi-accel
//!
//! 面向加速器的 FM 索引反向搜索核心。
//!
//! 本 crate 提供：
//!
//! - **打包索引**：128 符号一块的 BWT 条目（交替计数器 + 3 位平面位图）与 rank / LF 映射
//! - **FMI 表**：预先计算短前缀的 SA 区间，跳过反向搜索的前若干步
//! - **加速器缓冲区**：主机/设备成对分配、按布局划分区域、按需扩容、异步传输流水线
//! - **副本管理**：把索引结构复制到多个设备并负责释放
//!
//! ## 快速示例
//!
//! ```rust,no_run
//! use fmi_accel::index::{FmiTable, PackedIndex};
//! use fmi_accel::util::dna;
//!
//! // BWT("ACGTACGT$")
//! let idx = PackedIndex::from_ascii_bwt(b"TT$AACCGG");
//! let table = FmiTable::build(&idx, 2, 1).unwrap();
//!
//! let pattern = dna::encode_seq(b"AC");
//! let hit = table.search(&idx, &pattern);
//! assert_eq!(hit, idx.backward_search(&pattern));
//! println!("{} occurrences", hit.len());
//! ```
//!
//! ## 模块说明
//!
//! - [`index`]：打包条目、rank、FMI 表、采样后缀数组
//! - [`io`]：表与采样 SA 的原始二进制读写
//! - [`buffer`]：通用加速器缓冲区与 search / decode / k-mer 三种布局
//! - [`device`]：加速器抽象、进程内模拟设备、主机搜索内核
//! - [`replica`]：多设备副本与释放顺序
//! - [`config`]：运行参数
//! - [`util`]：DNA 编码、对齐分配

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod index;
pub mod io;
pub mod replica;
pub mod util;

pub use error::{FmiError, Result};
