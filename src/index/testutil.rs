//! 测试用的参考实现：倍增法后缀数组 + BWT。
//! 生产路径从不构建 BWT，这里只用来给 rank/LF 测试提供可信的对照。

use crate::index::fm::PackedIndex;
use crate::util::dna;

/// 构建后缀数组（倍增法，O(n log² n)），按 [`dna::sort_key`] 的字典序比较
pub fn build_sa(text: &[u8]) -> Vec<u64> {
    let n = text.len();
    if n == 0 {
        return Vec::new();
    }
    let mut sa: Vec<usize> = (0..n).collect();
    let mut rank: Vec<i64> = text.iter().map(|&c| dna::sort_key(c) as i64).collect();
    let mut tmp = vec![0i64; n];

    let key = |rank: &[i64], i: usize, k: usize| (rank[i], if i + k < n { rank[i + k] } else { -1 });

    let mut k = 1usize;
    loop {
        sa.sort_unstable_by_key(|&i| key(&rank, i, k));
        tmp[sa[0]] = 0;
        for w in 1..n {
            let bump = (key(&rank, sa[w - 1], k) != key(&rank, sa[w], k)) as i64;
            tmp[sa[w]] = tmp[sa[w - 1]] + bump;
        }
        rank.copy_from_slice(&tmp);
        if rank[sa[n - 1]] as usize == n - 1 || k >= n {
            break;
        }
        k <<= 1;
    }
    sa.into_iter().map(|x| x as u64).collect()
}

pub fn build_bwt(text: &[u8], sa: &[u64]) -> Vec<u8> {
    let n = text.len();
    sa.iter()
        .map(|&p| if p == 0 { text[n - 1] } else { text[p as usize - 1] })
        .collect()
}

/// ASCII 参考序列 -> (后缀数组, 打包索引)；自动追加 `$`
pub fn build_index(seq: &[u8]) -> (Vec<u64>, PackedIndex) {
    let mut text = dna::encode_seq(seq);
    text.push(dna::CODE_SEP);
    let sa = build_sa(&text);
    let bwt = build_bwt(&text, &sa);
    (sa, PackedIndex::from_bwt(&bwt))
}

/// 伪随机 ACGT 序列
pub fn make_text(len: usize, seed: u32) -> Vec<u8> {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut x = seed;
    let mut v = Vec::with_capacity(len);
    for _ in 0..len {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        v.push(bases[(x >> 16) as usize % 4]);
    }
    v
}

#[test]
fn sa_matches_naive_sort() {
    for len in 1..=40 {
        let mut text = dna::encode_seq(&make_text(len, len as u32));
        text.push(dna::CODE_SEP);
        let keys: Vec<u8> = text.iter().map(|&c| dna::sort_key(c)).collect();
        let mut naive: Vec<u64> = (0..text.len() as u64).collect();
        naive.sort_by(|&a, &b| keys[a as usize..].cmp(&keys[b as usize..]));
        assert_eq!(build_sa(&text), naive, "len={}", len);
    }
}

#[test]
fn sa_of_small_text() {
    let (sa, _) = build_index(b"ACGTACGT");
    assert_eq!(sa, vec![8, 4, 0, 5, 1, 6, 2, 7, 3]);
}
