//! Stripe-by-stripe encode, decode and repair sessions
//!
//! A [`Session`] owns everything one file needs: the coding scheme, the
//! decode solver with its plan cache, the butterfly and a thread pool. It
//! moves through a fixed sequence of states:
//!
//! ```text
//! Uninitialized -> MatrixBuilt -> Streaming { next } -> Done
//!                                        \-> Aborted (any read-in error)
//! ```
//!
//! Each `*_readin` call processes exactly one stripe. The caller does all
//! I/O and decides which units are missing.

use rayon::prelude::*;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::butterfly::{Butterfly, Topology};
use crate::config::CodecConfig;
use crate::error::{Error, Result};
use crate::galois::FieldRegistry;
use crate::matrix::CodingScheme;
use crate::solver::DecodeSolver;
use crate::stripe::{recover, ErasureSet, RecoveryPlan, Stripe, StripeGeometry};

/// What a session is streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encode,
    Decode,
    Repair,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Encode => write!(f, "encode"),
            Mode::Decode => write!(f, "decode"),
            Mode::Repair => write!(f, "repair"),
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    MatrixBuilt,
    /// `next` is the 0-based index of the next read-in
    Streaming { mode: Mode, next: usize },
    Done,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::MatrixBuilt => write!(f, "matrix built"),
            SessionState::Streaming { mode, next } => {
                write!(f, "streaming {} (next read-in {})", mode, next)
            }
            SessionState::Done => write!(f, "done"),
            SessionState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Progress of one read-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinReport {
    pub mode: Mode,
    /// 0-based read-in index
    pub index: usize,
    pub readins: usize,
    /// File bytes covered by this read-in
    pub bytes: usize,
    /// Surviving blocks the recovery read, 0 when nothing was recovered
    pub helper_blocks: usize,
    pub elapsed: Duration,
}

/// Totals reported after the last read-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub mode: Mode,
    pub readins: usize,
    pub bytes: u64,
    pub helper_blocks: usize,
    /// Time spent inside the coder, excluding caller I/O
    pub elapsed: Duration,
}

impl SessionSummary {
    /// Coder throughput in MB/s
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / (1024.0 * 1024.0) / seconds
    }
}

/// Receives progress callbacks from a session
pub trait ProgressObserver: Send + Sync {
    fn readin_done(&self, report: &ReadinReport);

    fn finished(&self, _summary: &SessionSummary) {}
}

/// Logs progress through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn readin_done(&self, report: &ReadinReport) {
        debug!(
            "{} read-in {}/{}: {} bytes in {:?}",
            report.mode,
            report.index + 1,
            report.readins,
            report.bytes,
            report.elapsed
        );
    }

    fn finished(&self, summary: &SessionSummary) {
        info!(
            "{} complete: {} read-ins, {} bytes, {:.3} s, {:.2} MB/s",
            summary.mode,
            summary.readins,
            summary.bytes,
            summary.elapsed.as_secs_f64(),
            summary.throughput()
        );
    }
}

/// Everything built from the configuration
struct Engine {
    scheme: Arc<CodingScheme>,
    solver: DecodeSolver,
    butterfly: Butterfly,
}

/// Totals accumulated while streaming
#[derive(Default)]
struct Totals {
    mode: Option<Mode>,
    readins: usize,
    bytes: u64,
    helper_blocks: usize,
    elapsed: Duration,
}

/// One file's coding session
pub struct Session {
    config: CodecConfig,
    geometry: StripeGeometry,
    state: SessionState,
    erasures: ErasureSet,
    engine: Option<Engine>,
    pool: rayon::ThreadPool,
    observer: Arc<dyn ProgressObserver>,
    totals: Totals,
}

impl Session {
    /// Create a session for a file of `original_size` bytes
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration is invalid.
    pub fn new(config: CodecConfig, original_size: u64) -> Result<Self> {
        let geometry = StripeGeometry::plan(&config, original_size)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads.unwrap_or(0))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build thread pool: {}", e)))?;

        debug!(
            "Session: {} bytes, {} read-ins of {} bytes, block size {}, {} planes",
            original_size, geometry.readins, geometry.buffer_size, geometry.block_size, geometry.planes
        );

        Ok(Self {
            config,
            geometry,
            state: SessionState::Uninitialized,
            erasures: ErasureSet::none(),
            engine: None,
            pool,
            observer: Arc::new(TracingObserver),
            totals: Totals::default(),
        })
    }

    /// Replace the default [`TracingObserver`]
    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn geometry(&self) -> &StripeGeometry {
        &self.geometry
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn erasures(&self) -> &ErasureSet {
        &self.erasures
    }

    /// Totals over the read-ins finished so far, `None` before the first
    pub fn summary(&self) -> Option<SessionSummary> {
        let totals = &self.totals;
        totals.mode.map(|mode| SessionSummary {
            mode,
            readins: totals.readins,
            bytes: totals.bytes,
            helper_blocks: totals.helper_blocks,
            elapsed: totals.elapsed,
        })
    }

    /// Coding scheme, once built
    pub fn scheme(&self) -> Option<&Arc<CodingScheme>> {
        self.engine.as_ref().map(|engine| &engine.scheme)
    }

    /// Build the coding scheme, solver and butterfly
    ///
    /// A file with no read-ins goes straight to `Done`.
    ///
    /// # Errors
    /// Returns `InvalidState` unless the session is uninitialized, and
    /// `InvalidConfig` or `FieldInit` when a component cannot be built.
    pub fn build(&mut self, registry: &FieldRegistry) -> Result<()> {
        self.expect_state("uninitialized", |s| s == SessionState::Uninitialized)?;

        let scheme = Arc::new(CodingScheme::build(&self.config, registry)?);
        let coupling_field = registry.field(self.config.coupling.width)?;
        let topology = Topology::new(self.config.units(), self.config.rounds());
        let butterfly = Butterfly::new(coupling_field, self.config.coupling.scalar, topology)?;

        info!(
            "Built {} scheme: k={}, m={}, w={}, {} planes",
            self.config.technique,
            self.config.k,
            self.config.m,
            self.config.w,
            topology.planes()
        );

        self.engine = Some(Engine {
            solver: DecodeSolver::new(Arc::clone(&scheme)),
            scheme,
            butterfly,
        });
        self.state = if self.geometry.readins == 0 {
            SessionState::Done
        } else {
            SessionState::MatrixBuilt
        };
        Ok(())
    }

    /// Fix the set of missing units for the whole session
    ///
    /// # Errors
    /// Returns `InvalidState` once streaming has started and
    /// `InvalidErasure` for units outside 0..k+m.
    pub fn set_erasures(&mut self, erasures: ErasureSet) -> Result<()> {
        self.expect_state("uninitialized or matrix built", |s| {
            matches!(s, SessionState::Uninitialized | SessionState::MatrixBuilt)
        })?;
        let units = self.config.units();
        if let Some(bad) = erasures.iter().find(|&u| u >= units) {
            return Err(Error::InvalidErasure(format!(
                "unit {} out of range 0..{}",
                bad, units
            )));
        }
        if !erasures.is_empty() {
            info!("Erased units: {:?}", erasures.as_slice());
        }
        self.erasures = erasures;
        Ok(())
    }

    /// Planes a repair of the single erased unit reads
    ///
    /// # Errors
    /// Returns `InvalidState` before `build` and `InvalidErasure` unless
    /// exactly one unit is erased.
    pub fn repair_planes(&self) -> Result<Vec<usize>> {
        let engine = self.engine()?;
        let unit = self.repair_unit()?;
        let plan = RecoveryPlan::repair(unit, engine.butterfly.topology(), self.config.m)?;
        Ok(plan.planes().to_vec())
    }

    /// Encode one read-in into k+m units of `planes · block_size` bytes
    ///
    /// `buffer` holds this read-in's file bytes; only the last read-in may
    /// be shorter than the buffer size, and it is padded with zero bytes.
    ///
    /// # Errors
    /// Returns `InvalidState` out of sequence and `BufferSize` for a buffer of
    /// the wrong length. Any error aborts the session.
    pub fn encode_readin(&mut self, buffer: &[u8]) -> Result<Vec<Vec<u8>>> {
        let index = self.begin_readin(Mode::Encode)?;
        let started = Instant::now();
        let result = self.pool.install(|| self.encode_stripe(index, buffer));
        self.finish_readin(Mode::Encode, index, started, result.map(|units| (units, 0)))
    }

    /// Decode one read-in back into file bytes
    ///
    /// `units` has one slot per unit; erased units may be `None`. The output
    /// is truncated to the true file size on the last read-in.
    ///
    /// # Errors
    /// Returns `InvalidState` out of sequence, `InvalidErasure` or `UnitSize`
    /// for malformed input, and `SingularMatrix` for too many erasures.
    pub fn decode_readin(&mut self, units: &[Option<&[u8]>]) -> Result<Vec<u8>> {
        let index = self.begin_readin(Mode::Decode)?;
        let started = Instant::now();
        let result = self.pool.install(|| {
            let (stripe, helper_blocks) = self.decode_stripe(units)?;
            let mut data = stripe.data_buffer(self.geometry.k);
            data.truncate(self.geometry.readin_len(index));
            Ok((data, helper_blocks))
        });
        self.finish_readin(Mode::Decode, index, started, result)
    }

    /// Like [`Session::decode_readin`] but returns all k+m stored units,
    /// with the erased ones rebuilt
    ///
    /// # Errors
    /// Same as [`Session::decode_readin`].
    pub fn restore_readin(&mut self, units: &[Option<&[u8]>]) -> Result<Vec<Vec<u8>>> {
        let index = self.begin_readin(Mode::Decode)?;
        let started = Instant::now();
        let result = self.pool.install(|| {
            let (stripe, helper_blocks) = self.restore_stripe(units)?;
            Ok((stripe.into_units(), helper_blocks))
        });
        self.finish_readin(Mode::Decode, index, started, result)
    }

    /// Regenerate the single erased unit's bytes for one read-in
    ///
    /// Only the blocks in [`Session::repair_planes`] are read from the
    /// surviving units; the rest may be zero.
    ///
    /// # Errors
    /// Returns `InvalidErasure` unless exactly one unit is erased, plus the
    /// errors of [`Session::decode_readin`].
    pub fn repair_readin(&mut self, units: &[Option<&[u8]>]) -> Result<Vec<u8>> {
        let index = self.begin_readin(Mode::Repair)?;
        let started = Instant::now();
        let result = self.pool.install(|| self.repair_stripe(units));
        self.finish_readin(Mode::Repair, index, started, result)
    }

    fn engine(&self) -> Result<&Engine> {
        self.engine.as_ref().ok_or_else(|| Error::InvalidState {
            expected: "matrix built",
            found: self.state.to_string(),
        })
    }

    fn repair_unit(&self) -> Result<usize> {
        match self.erasures.as_slice() {
            [unit] => Ok(*unit),
            other => Err(Error::InvalidErasure(format!(
                "repair needs exactly one erased unit, got {:?}",
                other
            ))),
        }
    }

    fn expect_state(&self, expected: &'static str, ok: impl Fn(SessionState) -> bool) -> Result<()> {
        if ok(self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState {
                expected,
                found: self.state.to_string(),
            })
        }
    }

    fn begin_readin(&mut self, mode: Mode) -> Result<usize> {
        let index = match self.state {
            SessionState::MatrixBuilt => 0,
            SessionState::Streaming { mode: current, next } if current == mode => next,
            _ => {
                return Err(Error::InvalidState {
                    expected: "matrix built or streaming",
                    found: self.state.to_string(),
                })
            }
        };
        self.state = SessionState::Streaming { mode, next: index };
        Ok(index)
    }

    fn finish_readin<T>(
        &mut self,
        mode: Mode,
        index: usize,
        started: Instant,
        result: Result<(T, usize)>,
    ) -> Result<T> {
        let (output, helper_blocks) = match result {
            Ok(output) => output,
            Err(e) => {
                warn!("{} read-in {} failed, aborting session: {}", mode, index + 1, e);
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };

        let report = ReadinReport {
            mode,
            index,
            readins: self.geometry.readins,
            bytes: self.geometry.readin_len(index),
            helper_blocks,
            elapsed: started.elapsed(),
        };
        self.observer.readin_done(&report);

        let totals = &mut self.totals;
        totals.mode = Some(mode);
        totals.readins += 1;
        totals.bytes += report.bytes as u64;
        totals.helper_blocks += helper_blocks;
        totals.elapsed += report.elapsed;

        let next = index + 1;
        if next == self.geometry.readins {
            self.state = SessionState::Done;
            if let Some(summary) = self.summary() {
                self.observer.finished(&summary);
            }
        } else {
            self.state = SessionState::Streaming { mode, next };
        }
        Ok(output)
    }

    fn encode_stripe(&self, index: usize, buffer: &[u8]) -> Result<Vec<Vec<u8>>> {
        let engine = self.engine()?;
        let g = &self.geometry;
        let expected = g.readin_len(index);
        if buffer.len() != expected {
            return Err(Error::BufferSize {
                expected,
                got: buffer.len(),
            });
        }

        let mut stripe = Stripe::from_data_buffer(buffer, g.k, g.units(), g.planes, g.block_size)?;
        let plane_len = stripe.plane_len();
        stripe
            .as_bytes_mut()
            .par_chunks_mut(plane_len)
            .for_each(|plane| engine.scheme.encode_plane(plane, g.block_size));
        engine.butterfly.couple(&mut stripe);
        Ok(stripe.into_units())
    }

    /// Load the units, checking them against the erasure set
    fn load_stripe(&self, units: &[Option<&[u8]>]) -> Result<Stripe> {
        let n = self.geometry.units();
        if units.len() != n {
            return Err(Error::InvalidErasure(format!(
                "expected {} unit slots, got {}",
                n,
                units.len()
            )));
        }
        if let Some(u) = (0..n).find(|&u| units[u].is_none() && !self.erasures.contains(u)) {
            return Err(Error::InvalidErasure(format!(
                "unit {} is missing but not in the erasure set",
                u
            )));
        }
        Stripe::from_units(units, self.geometry.planes, self.geometry.block_size)
    }

    /// Stored stripe with the erased units rebuilt
    fn restore_stripe(&self, units: &[Option<&[u8]>]) -> Result<(Stripe, usize)> {
        let engine = self.engine()?;
        let mut stripe = self.load_stripe(units)?;
        if self.erasures.is_empty() {
            return Ok((stripe, 0));
        }
        let plan = RecoveryPlan::full(self.erasures.clone(), engine.butterfly.topology());
        let recovery = recover(&mut stripe, &plan, &engine.butterfly, &engine.solver)?;
        Ok((stripe, recovery.helper_blocks))
    }

    /// Uncoupled stripe of the original data
    fn decode_stripe(&self, units: &[Option<&[u8]>]) -> Result<(Stripe, usize)> {
        let engine = self.engine()?;
        let mut stripe = self.load_stripe(units)?;
        if self.erasures.is_empty() {
            engine.butterfly.decouple(&mut stripe);
            return Ok((stripe, 0));
        }
        let plan = RecoveryPlan::full(self.erasures.clone(), engine.butterfly.topology());
        let recovery = recover(&mut stripe, &plan, &engine.butterfly, &engine.solver)?;
        Ok((recovery.uncoupled, recovery.helper_blocks))
    }

    fn repair_stripe(&self, units: &[Option<&[u8]>]) -> Result<(Vec<u8>, usize)> {
        let engine = self.engine()?;
        let unit = self.repair_unit()?;
        let plan = RecoveryPlan::repair(unit, engine.butterfly.topology(), self.config.m)?;
        let mut stripe = self.load_stripe(units)?;
        let recovery = recover(&mut stripe, &plan, &engine.butterfly, &engine.solver)?;
        Ok((stripe.unit(unit), recovery.helper_blocks))
    }
}
