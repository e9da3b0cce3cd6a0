//! 采样后缀数组的二进制格式：
//! `samplingRate:u64, numEntries:u64, entries[numEntries]:u64`

use std::io::{Read, Write};
use std::path::Path;

use crate::error::{FmiError, Result};
use crate::index::sa::SampledSa;
use crate::io::{read_pod_vec, read_u64, write_bytes};

pub fn read_sa<R: Read>(r: &mut R) -> Result<SampledSa> {
    let sampling_rate = read_u64(r, "SA specs")?;
    let num_entries = read_u64(r, "SA specs")?;
    if sampling_rate == 0 {
        return Err(FmiError::Config("SA file declares a zero sampling rate".into()));
    }
    let entries = read_pod_vec::<u64, _>(r, num_entries, "SA entries")?;
    Ok(SampledSa { sampling_rate, entries })
}

pub fn write_sa<W: Write>(w: &mut W, sa: &SampledSa) -> Result<()> {
    write_bytes(w, &sa.sampling_rate.to_ne_bytes(), "SA specs")?;
    write_bytes(w, &sa.num_entries().to_ne_bytes(), "SA specs")?;
    write_bytes(w, sa.entry_bytes(), "SA entries")
}

impl SampledSa {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = std::io::BufWriter::new(std::fs::File::create(path)?);
        write_sa(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path)?;
        read_sa(&mut std::io::BufReader::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_and_truncation() {
        let sa = SampledSa { sampling_rate: 4, entries: vec![9, 3, 17, 0] };
        let mut buf = Vec::new();
        write_sa(&mut buf, &sa).unwrap();
        assert_eq!(buf.len(), 16 + 32);
        assert_eq!(read_sa(&mut buf.as_slice()).unwrap(), sa);

        let err = read_sa(&mut &buf[..buf.len() - 3]).unwrap_err();
        assert!(matches!(err, FmiError::ShortRead { what: "SA entries" }));
    }

    fn header(sampling_rate: u64, num_entries: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&sampling_rate.to_ne_bytes());
        buf.extend_from_slice(&num_entries.to_ne_bytes());
        buf
    }

    #[test]
    fn corrupt_entry_count_is_an_error() {
        // 字节数溢出 usize
        let err = read_sa(&mut header(4, u64::MAX).as_slice()).unwrap_err();
        assert!(matches!(err, FmiError::HostAlloc { .. }), "{}", err);

        // 可分配但远超实际数据：读到文件末尾即短读
        let mut buf = header(4, 1 << 33);
        buf.extend_from_slice(&[0u8; 24]);
        let err = read_sa(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, FmiError::ShortRead { what: "SA entries" }), "{}", err);
    }
}
