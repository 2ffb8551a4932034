//! Packed completion progress.
//!
//! A completion log stores `duration * 1000 + percentage` in one integer
//! column. Every pack/unpack in the crate goes through this module.

pub const PACK_FACTOR: i64 = 1000;
pub const COMPLETE_PERCENTAGE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedProgress {
    pub duration: i64,
    pub percentage: i64,
}

impl PackedProgress {
    /// Builds a value from a fractional progress (1.0 == done) and a duration.
    /// The percentage is clamped to [0, 100] before it is packed.
    pub fn from_fraction(progress: f64, duration: i64) -> Self {
        let percentage = (progress * 100.0).round().clamp(0.0, COMPLETE_PERCENTAGE as f64) as i64;
        Self {
            duration: duration.max(0),
            percentage,
        }
    }

    pub fn encode(self) -> Option<i64> {
        encode(self.duration, self.percentage)
    }

    pub fn is_complete(self) -> bool {
        self.percentage >= COMPLETE_PERCENTAGE
    }
}

/// Packs both components, or `None` when the duration does not fit.
pub fn encode(duration: i64, percentage: i64) -> Option<i64> {
    duration
        .checked_mul(PACK_FACTOR)?
        .checked_add(percentage.clamp(0, COMPLETE_PERCENTAGE))
}

pub fn decode(encoded: i64) -> PackedProgress {
    PackedProgress {
        duration: encoded / PACK_FACTOR,
        percentage: encoded % PACK_FACTOR,
    }
}

/// Component-wise sums over many packed logs.
///
/// Summing raw packed values would let percentages carry into the duration
/// once more than ten logs are involved, so totals are kept per component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackedTotals {
    pub duration_sum: i64,
    pub percentage_sum: i64,
}

impl PackedTotals {
    pub fn add(&mut self, encoded: i64) {
        let value = decode(encoded);
        self.duration_sum += value.duration;
        self.percentage_sum += value.percentage;
    }

    /// Averages both components over `denominator` entries.
    pub fn average_over(&self, denominator: i64) -> Option<(f64, f64)> {
        if denominator <= 0 {
            return None;
        }
        let n = denominator as f64;
        Some((
            self.duration_sum as f64 / n,
            self.percentage_sum as f64 / n,
        ))
    }
}

impl FromIterator<i64> for PackedTotals {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        let mut totals = PackedTotals::default();
        for encoded in iter {
            totals.add(encoded);
        }
        totals
    }
}
