// src/entropy.rs

//! 随机字节供给：变换核心只消费 `EntropySource`，不持有任何进程级单例。
//!
//! 每个编译单元一条独立 ChaCha20 流；配置给定 seed 时按
//! `seed + 单元序号` 派生，保证并行处理下的可复现构建。

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// 变换核心的随机源接口：每个全局抽两个字节（key/step），
/// 解码例程命名抽一个 u64。
pub trait EntropySource {
    fn next_byte(&mut self) -> u8;
    fn next_u64(&mut self) -> u64;
}

impl EntropySource for ChaCha20Rng {
    fn next_byte(&mut self) -> u8 {
        (RngCore::next_u32(self) & 0xFF) as u8
    }

    fn next_u64(&mut self) -> u64 {
        RngCore::next_u64(self)
    }
}

/// 第 `unit_index` 个编译单元的随机流
pub fn unit_rng(seed: Option<u64>, unit_index: u64) -> ChaCha20Rng {
    match seed {
        Some(s) => ChaCha20Rng::seed_from_u64(s.wrapping_add(unit_index)),
        None => ChaCha20Rng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_streams_are_reproducible_and_distinct() {
        let mut ra = unit_rng(Some(7), 0);
        let mut rb = unit_rng(Some(7), 0);
        let a: Vec<u8> = (0..8).map(|_| ra.next_byte()).collect();
        let b: Vec<u8> = (0..8).map(|_| rb.next_byte()).collect();
        assert_eq!(a, b);

        let mut r0 = unit_rng(Some(7), 0);
        let mut r1 = unit_rng(Some(7), 1);
        let s0: Vec<u8> = (0..16).map(|_| r0.next_byte()).collect();
        let s1: Vec<u8> = (0..16).map(|_| r1.next_byte()).collect();
        assert_ne!(s0, s1);
    }
}
