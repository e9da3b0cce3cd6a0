/// 真实碱基数（A/C/G/T），即 FMI 表每层的分支数
pub const SIGMA: usize = 4; // {0:A, 1:C, 2:G, 3:T}

pub const CODE_N: u8 = 4;
/// 文本/contig 分隔符 `$`
pub const CODE_SEP: u8 = 5;

#[inline]
pub fn is_base(code: u8) -> bool {
    (code as usize) < SIGMA
}

#[inline]
pub fn to_code(b: u8) -> u8 {
    match b.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' | b'U' => 3,
        b'$' => CODE_SEP,
        _ => CODE_N, // map others to N
    }
}

#[inline]
pub fn from_code(code: u8) -> u8 {
    match code {
        0 => b'A',
        1 => b'C',
        2 => b'G',
        3 => b'T',
        CODE_SEP => b'$',
        _ => b'N',
    }
}

pub fn encode_seq(seq: &[u8]) -> Vec<u8> {
    seq.iter().map(|&b| to_code(b)).collect()
}

/// 后缀排序使用的字典序：$ < A < C < G < T < N
#[inline]
pub fn sort_key(code: u8) -> u8 {
    match code {
        CODE_SEP => 0,
        c if is_base(c) => c + 1,
        _ => SIGMA as u8 + 1,
    }
}
