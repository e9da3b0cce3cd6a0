//! FMI 表的二进制格式（读写同一布局，主机字节序）：
//!
//! ```text
//! maxLevels:u32  skipLevels:u32  totalElements:u32
//! offsetTable[maxLevels]   { init:u32, top:u32 }
//! fmiTable[totalElements]  u64 区间端点
//! ```
//!
//! 任何短读/短写都直接报错，不做部分恢复。

use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;
use crate::index::table::{FmiTable, OffsetTableEntry, TableSpecs};
use crate::io::{read_pod_vec, read_u32, write_bytes};

pub fn read_specs<R: Read>(r: &mut R) -> Result<TableSpecs> {
    Ok(TableSpecs {
        max_levels: read_u32(r, "table specs")?,
        skip_levels: read_u32(r, "table specs")?,
        total_elements: read_u32(r, "table specs")?,
    })
}

pub fn write_specs<W: Write>(w: &mut W, specs: &TableSpecs) -> Result<()> {
    write_bytes(w, &specs.max_levels.to_ne_bytes(), "table specs")?;
    write_bytes(w, &specs.skip_levels.to_ne_bytes(), "table specs")?;
    write_bytes(w, &specs.total_elements.to_ne_bytes(), "table specs")
}

/// 按规格读取偏移表与表体
pub fn read_body<R: Read>(r: &mut R, specs: TableSpecs) -> Result<FmiTable> {
    FmiTable::check_specs(&specs)?;
    let offsets = read_pod_vec::<OffsetTableEntry, _>(r, specs.max_levels as u64, "table offsets")?;
    let body = read_pod_vec::<u64, _>(r, specs.total_elements as u64, "table body")?;
    Ok(FmiTable { specs, offsets, body })
}

pub fn write_body<W: Write>(w: &mut W, table: &FmiTable) -> Result<()> {
    write_bytes(w, table.offsets_bytes(), "table offsets")?;
    write_bytes(w, table.body_bytes(), "table body")
}

pub fn read_table<R: Read>(r: &mut R) -> Result<FmiTable> {
    let specs = read_specs(r)?;
    read_body(r, specs)
}

pub fn write_table<W: Write>(w: &mut W, table: &FmiTable) -> Result<()> {
    write_specs(w, &table.specs)?;
    write_body(w, table)
}

impl FmiTable {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let f = std::fs::File::create(path)?;
        let mut w = std::io::BufWriter::new(f);
        write_table(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        read_table(&mut std::io::BufReader::new(f))
    }
}
