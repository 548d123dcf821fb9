//! Bulk buffer operations
//!
//! Regions hold little-endian w-bit words for w in {8, 16, 32}. Lengths are
//! validated by callers; a mismatch here is a programming error and asserts.

use super::Field;

/// Below this many words a per-word multiply beats building split tables
const SPLIT_TABLE_THRESHOLD: usize = 64;

/// XOR `src` into `dst`, eight bytes at a time with a byte-wise tail
pub fn region_xor(src: &[u8], dst: &mut [u8]) {
    assert_eq!(src.len(), dst.len(), "region_xor length mismatch");
    let mut dst_words = dst.chunks_exact_mut(8);
    let mut src_words = src.chunks_exact(8);
    for (d, s) in (&mut dst_words).zip(&mut src_words) {
        let mut word = [0u8; 8];
        word.copy_from_slice(d);
        let mut other = [0u8; 8];
        other.copy_from_slice(s);
        let x = u64::from_ne_bytes(word) ^ u64::from_ne_bytes(other);
        d.copy_from_slice(&x.to_ne_bytes());
    }
    dst_words
        .into_remainder()
        .iter_mut()
        .zip(src_words.remainder())
        .for_each(|(d, s)| *d ^= *s);
}

impl Field {
    /// Bytes per region word, or `None` when the width has no region layout
    pub fn word_bytes(&self) -> Option<usize> {
        match self.w() {
            8 => Some(1),
            16 => Some(2),
            32 => Some(4),
            _ => None,
        }
    }

    /// Multiply every word of `src` by `scalar`
    ///
    /// Overwrites `dst`, or XORs the products into it when `accumulate` is set.
    pub fn region_multiply(&self, src: &[u8], dst: &mut [u8], scalar: u32, accumulate: bool) {
        let word = self
            .word_bytes()
            .unwrap_or_else(|| panic!("no region layout for GF(2^{})", self.w()));
        assert_eq!(src.len(), dst.len(), "region_multiply length mismatch");
        assert_eq!(src.len() % word, 0, "region length not a multiple of the word size");

        match (scalar, accumulate) {
            (0, true) => return,
            (0, false) => {
                dst.fill(0);
                return;
            }
            (1, true) => {
                region_xor(src, dst);
                return;
            }
            (1, false) => {
                dst.copy_from_slice(src);
                return;
            }
            _ => {}
        }

        if src.len() / word < SPLIT_TABLE_THRESHOLD {
            self.region_multiply_direct(src, dst, scalar, accumulate, word);
        } else {
            self.region_multiply_split(src, dst, scalar, accumulate, word);
        }
    }

    fn region_multiply_direct(
        &self,
        src: &[u8],
        dst: &mut [u8],
        scalar: u32,
        accumulate: bool,
        word: usize,
    ) {
        for (s, d) in src.chunks_exact(word).zip(dst.chunks_exact_mut(word)) {
            let product = self.multiply(read_word(s), scalar);
            let value = if accumulate {
                product ^ read_word(d)
            } else {
                product
            };
            write_word(d, value);
        }
    }

    /// One 256-entry table per byte lane: `table[lane][v] = scalar * (v << 8*lane)`
    fn region_multiply_split(
        &self,
        src: &[u8],
        dst: &mut [u8],
        scalar: u32,
        accumulate: bool,
        word: usize,
    ) {
        let tables: Vec<[u32; 256]> = (0..word)
            .map(|lane| {
                let mut table = [0u32; 256];
                for (v, slot) in table.iter_mut().enumerate() {
                    *slot = self.multiply((v as u32) << (8 * lane), scalar);
                }
                table
            })
            .collect();

        for (s, d) in src.chunks_exact(word).zip(dst.chunks_exact_mut(word)) {
            let product = s
                .iter()
                .zip(&tables)
                .fold(0u32, |acc, (&byte, table)| acc ^ table[byte as usize]);
            let value = if accumulate {
                product ^ read_word(d)
            } else {
                product
            };
            write_word(d, value);
        }
    }
}

fn read_word(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .rev()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

fn write_word(bytes: &mut [u8], value: u32) {
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = (value >> (8 * i)) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::galois::Strategy;
    use rand::{Rng, SeedableRng};

    fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_region_matches_scalar() {
        for (w, strategy) in [
            (8, Strategy::Default),
            (16, Strategy::Default),
            (16, Strategy::Composite),
            (32, Strategy::Default),
        ] {
            let field = Field::new(w, strategy).unwrap();
            let word = field.word_bytes().unwrap();
            // Both the direct and split-table paths
            for words in [5, 300] {
                let src = random_bytes(words * word, u64::from(w) + words as u64);
                let scalar = 0x1234_5677 & field.max_element();
                let mut dst = vec![0u8; src.len()];
                field.region_multiply(&src, &mut dst, scalar, false);

                for (s, d) in src.chunks_exact(word).zip(dst.chunks_exact(word)) {
                    assert_eq!(read_word(d), field.multiply(read_word(s), scalar));
                }
            }
        }
    }

    #[test]
    fn test_region_accumulate() {
        let field = Field::new(8, Strategy::Default).unwrap();
        let src = random_bytes(512, 7);
        let base = random_bytes(512, 8);

        let mut product = vec![0u8; 512];
        field.region_multiply(&src, &mut product, 0x8e, false);

        let mut dst = base.clone();
        field.region_multiply(&src, &mut dst, 0x8e, true);

        let expected: Vec<u8> = base.iter().zip(&product).map(|(a, b)| a ^ b).collect();
        assert_eq!(dst, expected);
    }

    #[test]
    fn test_region_trivial_scalars() {
        let field = Field::new(16, Strategy::Default).unwrap();
        let src = random_bytes(64, 1);
        let mut dst = random_bytes(64, 2);
        let before = dst.clone();

        field.region_multiply(&src, &mut dst, 0, true);
        assert_eq!(dst, before);

        field.region_multiply(&src, &mut dst, 1, false);
        assert_eq!(dst, src);

        field.region_multiply(&src, &mut dst, 0, false);
        assert!(dst.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_region_xor() {
        let src = vec![0xffu8; 10];
        let mut dst: Vec<u8> = (0..10).collect();
        region_xor(&src, &mut dst);
        assert_eq!(dst[0], 0xff);
        assert_eq!(dst[9], 0xf6);
    }

    #[test]
    fn test_region_xor_words_and_tail() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        for len in [0, 7, 8, 9, 64, 67] {
            let src: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let mut dst: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let expected: Vec<u8> = dst.iter().zip(&src).map(|(d, s)| d ^ s).collect();
            region_xor(&src, &mut dst);
            assert_eq!(dst, expected, "len {}", len);
        }
    }

    #[test]
    #[should_panic(expected = "length mismatch")]
    fn test_region_length_mismatch_panics() {
        let field = Field::new(8, Strategy::Default).unwrap();
        let mut dst = vec![0u8; 4];
        field.region_multiply(&[1, 2, 3], &mut dst, 3, false);
    }

    #[test]
    fn test_little_endian_words() {
        let mut bytes = [0u8; 4];
        write_word(&mut bytes, 0x0403_0201);
        assert_eq!(bytes, [1, 2, 3, 4]);
        assert_eq!(read_word(&bytes), 0x0403_0201);
        assert_eq!(read_word(&bytes[..2]), 0x0201);
    }
}
