//! Scalar arithmetic in GF(2^w)
//!
//! A [`Field`] is built once for a width and a multiplication strategy and is
//! immutable afterwards. All elements are carried as `u32` values below `2^w`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Primitive polynomials per width, high-order term included.
const PRIMITIVE_POLYS: [u64; 33] = [
    0,
    0o3,
    0o7,
    0o13,
    0o23,
    0o45,
    0o103,
    0o211,
    0o435,
    0o1021,
    0o2011,
    0o4005,
    0o10123,
    0o20033,
    0o42103,
    0o100003,
    0o210013,
    0o400011,
    0o1000201,
    0o2000047,
    0o4000011,
    0o10000005,
    0o20000003,
    0o40000041,
    0o100000207,
    0o200000011,
    0o400000107,
    0o1000000047,
    0o2000000011,
    0o4000000005,
    0o10040000007,
    0o20000000011,
    0o40020000007,
];

/// Multiplication strategy for a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Pick the fastest table layout the width allows
    #[default]
    Default,

    /// Full 2^w × 2^w product table (w <= 8)
    MultTable,

    /// Log/antilog tables (w <= 16)
    LogTable,

    /// Carry-less shift-and-reduce, no tables (any w)
    Shift,

    /// Quadratic extension over GF(2^(w/2)) (even w, w/2 <= 16)
    Composite,
}

impl Strategy {
    /// Resolve `Default` to the concrete strategy used for width `w`
    pub fn resolve(self, w: u32) -> Strategy {
        match self {
            Strategy::Default if w <= 8 => Strategy::MultTable,
            Strategy::Default if w <= 16 => Strategy::LogTable,
            Strategy::Default => Strategy::Shift,
            other => other,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Default => "default",
            Strategy::MultTable => "mult_table",
            Strategy::LogTable => "log_table",
            Strategy::Shift => "shift",
            Strategy::Composite => "composite",
        };
        f.write_str(name)
    }
}

enum Arith {
    Mult { products: Vec<u8>, inverses: Vec<u8> },
    Log { log: Vec<u32>, exp: Vec<u32> },
    Shift,
    Composite { base: Box<Field>, s: u32 },
}

/// A Galois field GF(2^w)
pub struct Field {
    w: u32,
    poly: u64,
    strategy: Strategy,
    arith: Arith,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("w", &self.w)
            .field("poly", &format_args!("{:#x}", self.poly))
            .field("strategy", &self.strategy)
            .finish()
    }
}

impl Field {
    /// Build GF(2^w) with the given strategy
    ///
    /// # Errors
    /// Returns `FieldInit` when `w` is outside 1..=32 or the strategy cannot
    /// serve this width.
    pub fn new(w: u32, strategy: Strategy) -> Result<Self> {
        if !(1..=32).contains(&w) {
            return Err(Error::FieldInit {
                w,
                reason: "width must be between 1 and 32".to_string(),
            });
        }

        let poly = PRIMITIVE_POLYS[w as usize];
        let strategy = strategy.resolve(w);
        let arith = match strategy {
            Strategy::MultTable => {
                if w > 8 {
                    return Err(Error::FieldInit {
                        w,
                        reason: "multiplication tables need w <= 8".to_string(),
                    });
                }
                build_mult_tables(w, poly)
            }
            Strategy::LogTable => {
                if w > 16 {
                    return Err(Error::FieldInit {
                        w,
                        reason: "log tables need w <= 16".to_string(),
                    });
                }
                build_log_tables(w, poly)?
            }
            Strategy::Shift | Strategy::Default => Arith::Shift,
            Strategy::Composite => {
                if w % 2 != 0 || w / 2 > 16 {
                    return Err(Error::FieldInit {
                        w,
                        reason: "composite fields need an even w with w/2 <= 16".to_string(),
                    });
                }
                let base = Field::new(w / 2, Strategy::Default)?;
                let s = find_composite_coefficient(&base)?;
                Arith::Composite {
                    base: Box::new(base),
                    s,
                }
            }
        };

        Ok(Self {
            w,
            poly,
            strategy,
            arith,
        })
    }

    /// Field width in bits
    pub fn w(&self) -> u32 {
        self.w
    }

    /// Concrete strategy in use
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Number of elements, 2^w
    pub fn order(&self) -> u64 {
        1u64 << self.w
    }

    /// Largest element value
    pub fn max_element(&self) -> u32 {
        (self.order() - 1) as u32
    }

    /// Multiply two elements
    pub fn multiply(&self, a: u32, b: u32) -> u32 {
        debug_assert!(u64::from(a) < self.order() && u64::from(b) < self.order());
        if a == 0 || b == 0 {
            return 0;
        }
        match &self.arith {
            Arith::Mult { products, .. } => {
                u32::from(products[((a as usize) << self.w) | b as usize])
            }
            Arith::Log { log, exp } => exp[(log[a as usize] + log[b as usize]) as usize],
            Arith::Shift => shift_multiply(a, b, self.w, self.poly),
            Arith::Composite { base, s } => {
                let half = base.w();
                let mask = base.max_element();
                let (a1, a0) = (a >> half, a & mask);
                let (b1, b0) = (b >> half, b & mask);
                let high = base.multiply(a1, b1);
                let c1 = base.multiply(high, *s) ^ base.multiply(a1, b0) ^ base.multiply(a0, b1);
                let c0 = high ^ base.multiply(a0, b0);
                (c1 << half) | c0
            }
        }
    }

    /// Divide `a` by `b`
    ///
    /// # Errors
    /// Returns `DivisionByZero` when `b` is zero.
    pub fn divide(&self, a: u32, b: u32) -> Result<u32> {
        if b == 0 {
            return Err(Error::DivisionByZero { w: self.w });
        }
        if a == 0 {
            return Ok(0);
        }
        match &self.arith {
            Arith::Log { log, exp } => {
                let order = self.max_element();
                let idx = log[a as usize] + order - log[b as usize];
                Ok(exp[idx as usize])
            }
            _ => Ok(self.multiply(a, self.inverse(b)?)),
        }
    }

    /// Multiplicative inverse
    ///
    /// # Errors
    /// Returns `DivisionByZero` for zero.
    pub fn inverse(&self, a: u32) -> Result<u32> {
        if a == 0 {
            return Err(Error::DivisionByZero { w: self.w });
        }
        match &self.arith {
            Arith::Mult { inverses, .. } => Ok(u32::from(inverses[a as usize])),
            Arith::Log { log, exp } => {
                let order = self.max_element();
                Ok(exp[((order - log[a as usize]) % order) as usize])
            }
            // a^(2^w - 2) = a^-1 since the multiplicative group has order 2^w - 1
            _ => Ok(self.pow(a, self.order() - 2)),
        }
    }

    /// Raise `a` to the power `e`
    pub fn pow(&self, a: u32, mut e: u64) -> u32 {
        let mut result = 1;
        let mut base = a;
        while e > 0 {
            if e & 1 == 1 {
                result = self.multiply(result, base);
            }
            base = self.multiply(base, base);
            e >>= 1;
        }
        result
    }
}

fn shift_multiply(a: u32, b: u32, w: u32, poly: u64) -> u32 {
    let mut product: u64 = 0;
    for i in 0..w {
        if (b >> i) & 1 == 1 {
            product ^= u64::from(a) << i;
        }
    }
    for i in (w..2 * w - 1).rev() {
        if (product >> i) & 1 == 1 {
            product ^= poly << (i - w);
        }
    }
    product as u32
}

fn build_mult_tables(w: u32, poly: u64) -> Arith {
    let size = 1usize << w;
    let mut products = vec![0u8; size * size];
    let mut inverses = vec![0u8; size];
    for a in 1..size {
        for b in 1..size {
            let p = shift_multiply(a as u32, b as u32, w, poly) as u8;
            products[(a << w) | b] = p;
            if p == 1 {
                inverses[a] = b as u8;
            }
        }
    }
    Arith::Mult { products, inverses }
}

fn build_log_tables(w: u32, poly: u64) -> Result<Arith> {
    let size = 1usize << w;
    let order = size - 1;
    let mut log = vec![0u32; size];
    let mut exp = vec![0u32; 2 * order];
    let mut x: u64 = 1;
    for i in 0..order {
        if i > 0 && x == 1 {
            return Err(Error::FieldInit {
                w,
                reason: format!("polynomial {:#x} is not primitive", poly),
            });
        }
        exp[i] = x as u32;
        exp[i + order] = x as u32;
        log[x as usize] = i as u32;
        x <<= 1;
        if x & (1 << w) != 0 {
            x ^= poly;
        }
    }
    Ok(Arith::Log { log, exp })
}

/// Smallest `s` making `X^2 + sX + 1` irreducible over the base field
fn find_composite_coefficient(base: &Field) -> Result<u32> {
    'candidates: for s in 2..=base.max_element() {
        for t in 0..=base.max_element() {
            if base.multiply(t, t) ^ base.multiply(s, t) ^ 1 == 0 {
                continue 'candidates;
            }
        }
        return Ok(s);
    }
    Err(Error::FieldInit {
        w: base.w() * 2,
        reason: "no irreducible quadratic over the base field".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_laws(field: &Field, samples: &[u32]) {
        for &a in samples {
            assert_eq!(field.multiply(a, 0), 0);
            assert_eq!(field.multiply(0, a), 0);
            assert!(field.divide(a, 0).is_err());
            if a == 0 {
                continue;
            }
            assert_eq!(field.multiply(a, 1), a);
            assert_eq!(field.divide(0, a).unwrap(), 0);
            assert_eq!(field.multiply(a, field.inverse(a).unwrap()), 1);
            for &b in samples.iter().filter(|&&b| b != 0) {
                let product = field.multiply(a, b);
                assert_eq!(field.divide(product, b).unwrap(), a, "w={} a={} b={}", field.w(), a, b);
                assert_eq!(product, field.multiply(b, a));
            }
        }
    }

    fn samples(w: u32) -> Vec<u32> {
        let max = ((1u64 << w) - 1) as u32;
        let mut out = vec![0, 1, 2, 3, max, max - 1, max / 2, max / 3 + 7];
        out.retain(|&v| v <= max);
        out.sort_unstable();
        out.dedup();
        out
    }

    #[test]
    fn test_gf8_exhaustive_against_shift() {
        let table = Field::new(8, Strategy::MultTable).unwrap();
        let log = Field::new(8, Strategy::LogTable).unwrap();
        let shift = Field::new(8, Strategy::Shift).unwrap();
        for a in 0..256u32 {
            for b in 0..256u32 {
                let expected = shift.multiply(a, b);
                assert_eq!(table.multiply(a, b), expected);
                assert_eq!(log.multiply(a, b), expected);
            }
        }
    }

    #[test]
    fn test_field_laws_all_strategies() {
        for w in [4, 8, 16, 32] {
            for strategy in [
                Strategy::Default,
                Strategy::MultTable,
                Strategy::LogTable,
                Strategy::Shift,
                Strategy::Composite,
            ] {
                if let Ok(field) = Field::new(w, strategy) {
                    check_laws(&field, &samples(w));
                }
            }
        }
    }

    #[test]
    fn test_odd_widths() {
        for w in [1, 3, 5, 7, 11, 13, 24, 31] {
            let field = Field::new(w, Strategy::Default).unwrap();
            check_laws(&field, &samples(w));
        }
    }

    #[test]
    fn test_known_products() {
        let gf8 = Field::new(8, Strategy::Default).unwrap();
        // x^8 = x^4 + x^3 + x^2 + 1 under 0x11d
        assert_eq!(gf8.multiply(0x80, 2), 0x1d);
        assert_eq!(gf8.multiply(3, 7), 9);

        let gf16 = Field::new(16, Strategy::Default).unwrap();
        assert_eq!(gf16.multiply(0x8000, 2), 0x100b);
    }

    #[test]
    fn test_generator_order_gf8() {
        let gf8 = Field::new(8, Strategy::LogTable).unwrap();
        let mut seen = std::collections::HashSet::new();
        let mut x = 1;
        for _ in 0..255 {
            assert!(seen.insert(x));
            x = gf8.multiply(x, 2);
        }
        assert_eq!(x, 1);
    }

    #[test]
    fn test_invalid_width_or_strategy() {
        assert!(matches!(Field::new(0, Strategy::Default), Err(Error::FieldInit { .. })));
        assert!(matches!(Field::new(33, Strategy::Default), Err(Error::FieldInit { .. })));
        assert!(Field::new(16, Strategy::MultTable).is_err());
        assert!(Field::new(17, Strategy::LogTable).is_err());
        assert!(Field::new(9, Strategy::Composite).is_err());
    }

    #[test]
    fn test_composite_is_a_field() {
        let field = Field::new(8, Strategy::Composite).unwrap();
        assert_eq!(field.strategy(), Strategy::Composite);
        let mut nonzero_products = 0;
        for a in 1..256u32 {
            let inv = field.inverse(a).unwrap();
            assert_eq!(field.multiply(a, inv), 1);
            nonzero_products += (field.multiply(a, 0x53) != 0) as u32;
        }
        assert_eq!(nonzero_products, 255);
    }

    #[test]
    fn test_pow() {
        let field = Field::new(16, Strategy::Default).unwrap();
        assert_eq!(field.pow(2, 0), 1);
        assert_eq!(field.pow(2, 15), 0x8000);
        assert_eq!(field.pow(7, field.order() - 1), 1);
    }
}
