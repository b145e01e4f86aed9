//! Core voltage control through the `VREG_AND_CHIP_RESET` control word.
//!
//! Layout of the word (only VSEL is ever modified):
//!
//! | Bits  | Field | Reset |
//! |-------|-------|-------|
//! | 12    | ROK   | 0     |
//! | 7:4   | VSEL  | 0xb   |
//! | 1     | HIZ   | 0     |
//! | 0     | EN    | 1     |
//!
//! VSEL codes below `0b0110` are unsupported and hard-reset the chip, so
//! they are never produced by [`encode`].

use oc_common::error::{OcError, OcResult};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bits [7:4]: output voltage select.
pub const VSEL_MASK: u32 = 0x0000_00f0;

/// Position of the VSEL field.
pub const VSEL_SHIFT: u32 = 4;

/// Everything except VSEL.
const CLEAR_VSEL_MASK: u32 = !VSEL_MASK;

/// Maximum distance between a requested voltage and a supported step.
pub const VOLTAGE_TOLERANCE: f64 = 0.004;

/// Register value after reset: VSEL = 1.10 V, EN = 1.
pub const VREG_RESET_VALUE: u32 = 0x0000_00b1;

/// Supported core voltages, 0.85 V to 1.30 V in 0.05 V steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum VoltageLevel {
    /// 0.85 V (`0b0110`).
    V0_85,
    /// 0.90 V (`0b0111`).
    V0_90,
    /// 0.95 V (`0b1000`).
    V0_95,
    /// 1.00 V (`0b1001`).
    V1_00,
    /// 1.05 V (`0b1010`).
    V1_05,
    /// 1.10 V (`0b1011`), the reset default.
    V1_10,
    /// 1.15 V (`0b1100`).
    V1_15,
    /// 1.20 V (`0b1101`).
    V1_20,
    /// 1.25 V (`0b1110`).
    V1_25,
    /// 1.30 V (`0b1111`).
    V1_30,
}

impl VoltageLevel {
    /// All levels in ascending order.
    pub const ALL: [VoltageLevel; 10] = [
        Self::V0_85,
        Self::V0_90,
        Self::V0_95,
        Self::V1_00,
        Self::V1_05,
        Self::V1_10,
        Self::V1_15,
        Self::V1_20,
        Self::V1_25,
        Self::V1_30,
    ];

    const LOWEST_CODE: u8 = 0b0110;

    fn index(self) -> u8 {
        self as u8
    }

    /// Nominal voltage in volts.
    #[must_use]
    pub fn volts(self) -> f64 {
        0.85 + f64::from(self.index()) * 0.05
    }

    /// The 4-bit VSEL code.
    #[must_use]
    pub fn code(self) -> u8 {
        Self::LOWEST_CODE + self.index()
    }

    /// Decode a VSEL code; unsupported codes yield `None`.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        code.checked_sub(Self::LOWEST_CODE)
            .and_then(|idx| Self::ALL.get(usize::from(idx)).copied())
    }

    /// Find the level within [`VOLTAGE_TOLERANCE`] of `volt`.
    #[must_use]
    pub fn matching(volt: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|level| (volt - level.volts()).abs() < VOLTAGE_TOLERANCE)
    }
}

impl fmt::Display for VoltageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}V", self.volts())
    }
}

/// Shift a level's code into VSEL position.
#[must_use]
pub fn encode(level: VoltageLevel) -> u32 {
    (u32::from(level.code()) << VSEL_SHIFT) & VSEL_MASK
}

/// Extract the raw VSEL code from a register word.
#[must_use]
pub fn vsel_code(word: u32) -> u8 {
    // Masked to four bits, cannot truncate
    #[allow(clippy::cast_possible_truncation)]
    let code = ((word & VSEL_MASK) >> VSEL_SHIFT) as u8;
    code
}

/// 32-bit register read/write capability.
pub trait RegisterAccess: Send {
    /// Read the current word.
    fn read32(&self) -> u32;

    /// Write a full word.
    fn write32(&mut self, value: u32);
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn read32(&self) -> u32 {
        (**self).read32()
    }

    fn write32(&mut self, value: u32) {
        (**self).write32(value);
    }
}

#[derive(Debug)]
struct SimulatedCell {
    value: AtomicU32,
    writes: AtomicU64,
}

/// In-memory register word for hosts without the hardware.
#[derive(Debug, Clone)]
pub struct SimulatedRegister {
    cell: Arc<SimulatedCell>,
}

impl Default for SimulatedRegister {
    fn default() -> Self {
        Self::new(VREG_RESET_VALUE)
    }
}

impl SimulatedRegister {
    /// Create a register holding `initial`.
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            cell: Arc::new(SimulatedCell {
                value: AtomicU32::new(initial),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Current word, observable from any clone.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.cell.value.load(Ordering::Acquire)
    }

    /// Number of writes performed through any clone.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.cell.writes.load(Ordering::Acquire)
    }
}

impl RegisterAccess for SimulatedRegister {
    fn read32(&self) -> u32 {
        self.value()
    }

    fn write32(&mut self, value: u32) {
        self.cell.value.store(value, Ordering::Release);
        self.cell.writes.fetch_add(1, Ordering::AcqRel);
    }
}

/// Validated read-modify-write of the VSEL field.
///
/// Mutation goes through `&mut self`, so only one writer exists at a time.
#[derive(Debug)]
pub struct VoltageRegister<R: RegisterAccess> {
    access: R,
}

impl<R: RegisterAccess> VoltageRegister<R> {
    /// Wrap a register backend.
    pub fn new(access: R) -> Self {
        Self { access }
    }

    /// Set VSEL to the level matching `volt`.
    ///
    /// # Errors
    ///
    /// Returns [`OcError::InvalidVoltage`] when no supported level lies within
    /// tolerance; the register is not touched in that case.
    pub fn apply(&mut self, volt: f64) -> OcResult<VoltageLevel> {
        let level =
            VoltageLevel::matching(volt).ok_or(OcError::InvalidVoltage { requested: volt })?;

        let before = self.access.read32();
        let after = (before & CLEAR_VSEL_MASK) ^ encode(level);
        self.access.write32(after);

        debug!(
            %level,
            code = format_args!("{:#06b}", level.code()),
            before = format_args!("{before:#010x}"),
            after = format_args!("{after:#010x}"),
            "VSEL updated"
        );
        Ok(level)
    }

    /// Set VSEL to the level matching `volt`, reporting success as a flag.
    pub fn set_voltage(&mut self, volt: f64) -> bool {
        match self.apply(volt) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Voltage change rejected");
                false
            }
        }
    }

    /// Level currently selected, or `None` for an unsupported code.
    pub fn current_level(&self) -> Option<VoltageLevel> {
        VoltageLevel::from_code(vsel_code(self.access.read32()))
    }

    /// Raw register word.
    pub fn raw(&self) -> u32 {
        self.access.read32()
    }

    /// Borrow the backend.
    pub fn access(&self) -> &R {
        &self.access
    }
}
