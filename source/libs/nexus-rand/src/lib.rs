// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hardware-backed rand_core adapter over the RDRAND driver
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 10 unit tests (mock word source)
//!
//! PUBLIC API: RdRandRng, HwRandomError
//! DEPENDS_ON: rng-rdrand, rand_core
//!
//! SECURITY INVARIANTS:
//!   - Entropy bytes MUST NOT be logged
//!   - Construction fails unless the capability probe succeeds

#![forbid(unsafe_code)]

use core::num::NonZeroU32;

use rand_core::{CryptoRng, RngCore};
use rng_rdrand::{CpuWordSource, RdRand, RdRandError, Status, WordSource};

/// Result type for hardware RNG operations.
pub type HwRandomResult<T> = Result<T, HwRandomError>;

/// Errors from the hardware RNG adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HwRandomError {
    /// The executing CPU does not implement the rdrand instruction.
    #[error("rdrand unsupported by this cpu")]
    Unsupported,
    /// The DRNG did not return a value within the retry budget.
    #[error("drng not ready within retry budget")]
    NotReady,
}

impl HwRandomError {
    /// Numeric status of the failure, in the librdrand code convention.
    pub const fn status(self) -> Status {
        match self {
            Self::Unsupported => Status::Unsupported,
            Self::NotReady => Status::NotReady,
        }
    }
}

impl From<RdRandError> for HwRandomError {
    fn from(err: RdRandError) -> Self {
        match err {
            RdRandError::Unsupported => Self::Unsupported,
            RdRandError::NotReady => Self::NotReady,
        }
    }
}

// Custom rand_core error codes for the two failure classes.
const ERR_CODE_UNSUPPORTED: NonZeroU32 =
    match NonZeroU32::new(rand_core::Error::CUSTOM_START + 1) {
        Some(code) => code,
        None => panic!("custom error code must be non-zero"),
    };
const ERR_CODE_NOT_READY: NonZeroU32 =
    match NonZeroU32::new(rand_core::Error::CUSTOM_START + 2) {
        Some(code) => code,
        None => panic!("custom error code must be non-zero"),
    };

fn to_rand_error(err: HwRandomError) -> rand_core::Error {
    let code = match err {
        HwRandomError::Unsupported => ERR_CODE_UNSUPPORTED,
        HwRandomError::NotReady => ERR_CODE_NOT_READY,
    };
    rand_core::Error::from(code)
}

/// Hardware RNG backed by the CPU DRNG.
///
/// Every value is drawn straight from the instruction; the generator cannot
/// be seeded and carries no state between calls. Construction probes the
/// hardware once and fails fast when the DRNG is unusable, so callers hold a
/// working generator or none at all.
///
/// The infallible [`RngCore`] methods panic if the hardware fails after the
/// construction-time probe; use [`try_fill_bytes`](RngCore::try_fill_bytes)
/// or [`fill`](Self::fill) to observe failures as values.
pub struct RdRandRng<S: WordSource = CpuWordSource> {
    driver: RdRand<S>,
}

impl RdRandRng<CpuWordSource> {
    /// Probes the CPU and builds a generator over the rdrand instruction.
    pub fn new() -> HwRandomResult<Self> {
        Self::with_source(CpuWordSource)
    }
}

impl<S: WordSource> RdRandRng<S> {
    /// Builds a generator over a caller-supplied word source.
    pub fn with_source(source: S) -> HwRandomResult<Self> {
        let driver = RdRand::with_source(source);
        match driver.verify() {
            Ok(()) => {
                log::debug!("rdrand capability probe ok");
                Ok(Self { driver })
            }
            Err(err) => {
                // Log the probe outcome only, never entropy bytes.
                log::warn!("rdrand unavailable: {err}");
                Err(err.into())
            }
        }
    }

    /// Fills `dest` from the DRNG; `dest` is untouched on failure.
    pub fn fill(&self, dest: &mut [u8]) -> HwRandomResult<()> {
        self.driver.fill_bytes(dest).map_err(Into::into)
    }
}

impl<S: WordSource> RngCore for RdRandRng<S> {
    fn next_u32(&mut self) -> u32 {
        match self.driver.next_u32() {
            Ok(value) => value,
            Err(err) => panic!("hardware rng failed after successful probe: {err}"),
        }
    }

    fn next_u64(&mut self) -> u64 {
        match self.driver.next_u64() {
            Ok(value) => value,
            Err(err) => panic!("hardware rng failed after successful probe: {err}"),
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(err) = self.driver.fill_bytes(dest) {
            panic!("hardware rng failed after successful probe: {err}");
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.driver.fill_bytes(dest).map_err(|err| to_rand_error(err.into()))
    }
}

// The DRNG is specified by the vendor as a cryptographically strong
// generator; this mirrors its use as a SecureRandom-grade source.
impl<S: WordSource> CryptoRng for RdRandRng<S> {}
