//! Configuration for claycode
//!
//! A [`CodecConfig`] fixes everything a coding session needs before the first
//! stripe: the code geometry (k, m, w), the technique, packet and buffer
//! sizes, the sub-packetization factor and the coupling constants. It is
//! loaded from JSON or YAML, with `${VAR}` substitution and environment
//! overrides, and validated before any matrix is built.

use crate::error::{Error, Result};
use crate::galois::Strategy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Largest sub-packetization used when none is configured
pub const DEFAULT_MAX_PLANES: usize = 128;

/// Coding technique
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Vandermonde Reed-Solomon over GF(2^w)
    #[value(name = "reed_sol_van")]
    ReedSolVan,

    /// RAID-6 optimized Reed-Solomon (m = 2)
    #[value(name = "reed_sol_r6_op")]
    ReedSolR6Op,

    /// Cauchy Reed-Solomon, plain matrix
    #[value(name = "cauchy_orig")]
    CauchyOrig,

    /// Cauchy Reed-Solomon with XOR-weight minimized rows
    #[value(name = "cauchy_good")]
    CauchyGood,

    /// Liberation minimum-density RAID-6 code (w prime)
    #[value(name = "liberation")]
    Liberation,

    /// Blaum-Roth RAID-6 code (w + 1 prime)
    #[value(name = "blaum_roth")]
    BlaumRoth,

    /// Liber8tion RAID-6 code (w = 8)
    #[value(name = "liber8tion")]
    Liber8tion,

    /// No redundancy, coupling only
    #[value(name = "no_coding")]
    NoCoding,
}

impl Technique {
    /// Whether the technique encodes with a bitmatrix schedule
    pub fn uses_bitmatrix(&self) -> bool {
        matches!(
            self,
            Technique::CauchyOrig
                | Technique::CauchyGood
                | Technique::Liberation
                | Technique::BlaumRoth
                | Technique::Liber8tion
        )
    }

    /// Configuration name, as used in files and on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Technique::ReedSolVan => "reed_sol_van",
            Technique::ReedSolR6Op => "reed_sol_r6_op",
            Technique::CauchyOrig => "cauchy_orig",
            Technique::CauchyGood => "cauchy_good",
            Technique::Liberation => "liberation",
            Technique::BlaumRoth => "blaum_roth",
            Technique::Liber8tion => "liber8tion",
            Technique::NoCoding => "no_coding",
        }
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Constants of the butterfly coupling transform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Coupling scalar `r`; must not be 0 or 1
    #[serde(default = "default_coupling_scalar")]
    pub scalar: u32,

    /// Width of the coupling field (8, 16 or 32)
    #[serde(default = "default_coupling_width")]
    pub width: u32,
}

fn default_coupling_scalar() -> u32 {
    2
}

fn default_coupling_width() -> u32 {
    8
}

impl Default for CouplingConfig {
    fn default() -> Self {
        CouplingConfig {
            scalar: default_coupling_scalar(),
            width: default_coupling_width(),
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Number of data units
    pub k: usize,

    /// Number of coding units
    pub m: usize,

    /// Word size in bits
    pub w: u32,

    /// Coding technique
    pub technique: Technique,

    /// Packet size in bytes (bitmatrix techniques)
    #[serde(default)]
    pub packet_size: usize,

    /// Requested bytes per read-in; 0 reads the whole input at once
    #[serde(default)]
    pub buffer_size: usize,

    /// Sub-packetization factor (power of two); derived from k + m if unset
    #[serde(default)]
    pub planes: Option<usize>,

    /// Butterfly coupling constants
    #[serde(default)]
    pub coupling: CouplingConfig,

    /// Field multiplication strategy
    #[serde(default)]
    pub strategy: Strategy,

    /// Worker threads; defaults to the number of cores
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            k: 10,
            m: 2,
            w: 8,
            technique: Technique::ReedSolVan,
            packet_size: 0,
            buffer_size: 0,
            planes: None,
            coupling: CouplingConfig::default(),
            strategy: Strategy::Default,
            threads: None,
        }
    }
}

impl CodecConfig {
    /// Create a config for the given geometry with default sizes
    pub fn new(k: usize, m: usize, w: u32, technique: Technique) -> Self {
        CodecConfig {
            k,
            m,
            w,
            technique,
            ..Default::default()
        }
    }

    /// Total number of units (k + m)
    pub fn units(&self) -> usize {
        self.k + self.m
    }

    /// Sub-packetization factor in effect
    ///
    /// Without an explicit value this is the largest power of two that the
    /// units can pair up for, capped at [`DEFAULT_MAX_PLANES`].
    pub fn planes(&self) -> usize {
        self.planes.unwrap_or_else(|| {
            let rounds = (self.units() / 2).min(DEFAULT_MAX_PLANES.trailing_zeros() as usize);
            1 << rounds
        })
    }

    /// Number of butterfly rounds, log2(planes)
    pub fn rounds(&self) -> usize {
        self.planes().trailing_zeros() as usize
    }

    /// Byte granularity every block size must respect
    pub fn block_alignment(&self) -> usize {
        let code = match self.technique {
            Technique::NoCoding => 1,
            t if t.uses_bitmatrix() => self.w as usize * self.packet_size,
            _ => (self.w as usize / 8).max(1),
        };
        lcm(code.max(1), (self.coupling.width as usize / 8).max(1))
    }

    /// Load configuration from a file (YAML or JSON), with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let content = Self::substitute_env_vars(&content);

        let mut config: CodecConfig = if is_yaml(path_ref) {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> String {
        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

        re.replace_all(content, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(threads) = std::env::var("CLAYCODE_THREADS") {
            if let Ok(n) = threads.trim().parse::<usize>() {
                self.threads = Some(n);
            }
        }

        if let Ok(buffer_size) = std::env::var("CLAYCODE_BUFFER_SIZE") {
            if let Ok(size) = buffer_size.trim().parse::<usize>() {
                self.buffer_size = size;
            }
        }
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if is_yaml(path_ref) {
            serde_yaml::to_string(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to YAML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self).map_err(|e| {
                Error::Config(format!("Failed to serialize config to JSON: {}", e))
            })?
        };

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - k >= 1, w in 1..=32
    /// - the technique's own constraints on k, m, w and packet size
    /// - planes a power of two with 2 * log2(planes) <= k + m
    /// - coupling width in {8, 16, 32}, scalar not 0 or 1 and inside the field
    pub fn validate(&self) -> Result<()> {
        if self.k < 1 {
            return Err(Error::InvalidConfig("k must be at least 1".to_string()));
        }

        if !(1..=32).contains(&self.w) {
            return Err(Error::InvalidConfig(format!(
                "w must be between 1 and 32, got {}",
                self.w
            )));
        }

        self.validate_technique()?;

        let planes = self.planes();
        if planes == 0 || !planes.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "planes must be a power of two, got {}",
                planes
            )));
        }
        if 2 * self.rounds() > self.units() {
            return Err(Error::InvalidConfig(format!(
                "{} planes need {} coupled units, only {} available",
                planes,
                2 * self.rounds(),
                self.units()
            )));
        }

        if ![8, 16, 32].contains(&self.coupling.width) {
            return Err(Error::InvalidConfig(format!(
                "coupling width must be one of {{8, 16, 32}}, got {}",
                self.coupling.width
            )));
        }
        if self.coupling.scalar <= 1 || u64::from(self.coupling.scalar) >= 1u64 << self.coupling.width
        {
            return Err(Error::InvalidConfig(format!(
                "coupling scalar {} must be in 2..2^{}",
                self.coupling.scalar, self.coupling.width
            )));
        }

        if self.threads == Some(0) {
            return Err(Error::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_technique(&self) -> Result<()> {
        let (k, m, w) = (self.k, self.m, self.w);
        let fits_field = (k + m) as u64 <= 1u64 << w;

        match self.technique {
            Technique::NoCoding => {
                if m != 0 {
                    return Err(Error::InvalidConfig(
                        "no_coding produces no coding units; m must be 0".to_string(),
                    ));
                }
            }
            Technique::ReedSolVan => {
                require_region_width(w)?;
                require_coding_units(m)?;
                if !fits_field {
                    return Err(Error::InvalidConfig(format!(
                        "k + m = {} exceeds the {} elements of GF(2^{})",
                        k + m,
                        1u64 << w,
                        w
                    )));
                }
            }
            Technique::ReedSolR6Op => {
                require_m_equals_two(m)?;
                require_region_width(w)?;
                if k as u64 >= 1u64 << w {
                    return Err(Error::InvalidConfig(format!(
                        "k = {} is too large for GF(2^{})",
                        k, w
                    )));
                }
            }
            Technique::CauchyOrig | Technique::CauchyGood => {
                require_packet_size(self.packet_size)?;
                require_coding_units(m)?;
                if !fits_field {
                    return Err(Error::InvalidConfig(format!(
                        "k + m = {} exceeds the {} elements of GF(2^{})",
                        k + m,
                        1u64 << w,
                        w
                    )));
                }
            }
            Technique::Liberation => {
                require_k_at_most_w(k, w)?;
                require_m_equals_two(m)?;
                if w <= 2 || !is_prime(w) {
                    return Err(Error::InvalidConfig(
                        "w must be greater than two and w must be prime".to_string(),
                    ));
                }
                require_packet_size(self.packet_size)?;
                require_word_multiple(self.packet_size)?;
            }
            Technique::BlaumRoth => {
                require_k_at_most_w(k, w)?;
                require_m_equals_two(m)?;
                if w <= 2 || !is_prime(w + 1) {
                    return Err(Error::InvalidConfig(
                        "w must be greater than two and w+1 must be prime".to_string(),
                    ));
                }
                require_packet_size(self.packet_size)?;
                require_word_multiple(self.packet_size)?;
            }
            Technique::Liber8tion => {
                require_packet_size(self.packet_size)?;
                if w != 8 {
                    return Err(Error::InvalidConfig("w must equal 8".to_string()));
                }
                require_m_equals_two(m)?;
                require_k_at_most_w(k, w)?;
            }
        }
        Ok(())
    }
}

fn require_region_width(w: u32) -> Result<()> {
    if ![8, 16, 32].contains(&w) {
        return Err(Error::InvalidConfig(
            "w must be one of {8, 16, 32}".to_string(),
        ));
    }
    Ok(())
}

fn require_coding_units(m: usize) -> Result<()> {
    if m == 0 {
        return Err(Error::InvalidConfig(
            "m must be at least 1 (use no_coding for m = 0)".to_string(),
        ));
    }
    Ok(())
}

fn require_m_equals_two(m: usize) -> Result<()> {
    if m != 2 {
        return Err(Error::InvalidConfig("m must be equal to 2".to_string()));
    }
    Ok(())
}

fn require_k_at_most_w(k: usize, w: u32) -> Result<()> {
    if k > w as usize {
        return Err(Error::InvalidConfig(
            "k must be less than or equal to w".to_string(),
        ));
    }
    Ok(())
}

fn require_packet_size(packet_size: usize) -> Result<()> {
    if packet_size == 0 {
        return Err(Error::InvalidConfig("Must include packetsize".to_string()));
    }
    Ok(())
}

fn require_word_multiple(packet_size: usize) -> Result<()> {
    if packet_size % 8 != 0 {
        return Err(Error::InvalidConfig(
            "packetsize must be a multiple of 8".to_string(),
        ));
    }
    Ok(())
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn is_prime(n: u32) -> bool {
    n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}
