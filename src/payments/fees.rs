//! Gross-up math for donor-covered processing fees.
//!
//! Rates are basis points (1/100 of a percent) so the whole computation stays
//! in integer minor units. Every division rounds up: the church must never be
//! short-changed by a fractional cent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Payment processor percentage, e.g. 290 for 2.9%.
    pub processing_rate_bps: u32,
    /// Payment processor flat fee per charge.
    pub fixed_fee_cents: i64,
    /// Platform percentage levied on every gift, e.g. 100 for 1%.
    pub platform_rate_bps: u32,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            processing_rate_bps: 290,
            fixed_fee_cents: 30,
            platform_rate_bps: 100,
        }
    }
}

/// A computed amount does not fit in `i64` minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("fee computation overflows for a gift of {base_cents} cents")]
pub struct FeeOverflow {
    pub base_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    /// Amount sent to the payment provider.
    pub charge_cents: i64,
    /// Portion of the charge attributed to the processor.
    pub processing_fee_cents: i64,
    /// Application fee collected by the platform.
    pub platform_fee_cents: i64,
}

impl FeeBreakdown {
    /// What the church keeps after both fees.
    pub fn net_cents(&self) -> i64 {
        self.charge_cents - self.processing_fee_cents - self.platform_fee_cents
    }

    /// Extra the donor pays on top of the intended gift.
    pub fn covered_by_donor_cents(&self, base_cents: i64) -> i64 {
        self.charge_cents - base_cents
    }
}

impl FeeSchedule {
    /// Compute the charge for a gift of `base_cents`.
    ///
    /// When `cover_fees` is set the charge is grossed up so that after the
    /// processor's percentage-plus-fixed fee and the platform percentage the
    /// church nets exactly `base_cents`. Otherwise the charge is the gift
    /// itself and the church absorbs the platform fee.
    ///
    /// Fails only when the grossed-up charge or a fee leaves the `i64` range.
    pub fn calculate(&self, base_cents: i64, cover_fees: bool) -> Result<FeeBreakdown, FeeOverflow> {
        let base = i128::from(base_cents);
        let platform_rate = i128::from(self.platform_rate_bps);
        let to_cents = |value: i128| i64::try_from(value).map_err(|_| FeeOverflow { base_cents });

        if !cover_fees {
            return Ok(FeeBreakdown {
                charge_cents: base_cents,
                processing_fee_cents: 0,
                platform_fee_cents: to_cents(ceil_div(base * platform_rate, BPS_DENOMINATOR))?,
            });
        }

        let kept_bps = BPS_DENOMINATOR - i128::from(self.processing_rate_bps) - platform_rate;
        // A schedule taking 100% or more can't be grossed up; charge the gift as is.
        if kept_bps <= 0 {
            return self.calculate(base_cents, false);
        }

        let charge = ceil_div(
            (base + i128::from(self.fixed_fee_cents)) * BPS_DENOMINATOR,
            kept_bps,
        );
        let platform_fee = ceil_div(charge * platform_rate, BPS_DENOMINATOR);

        Ok(FeeBreakdown {
            charge_cents: to_cents(charge)?,
            processing_fee_cents: to_cents(charge - base - platform_fee)?,
            platform_fee_cents: to_cents(platform_fee)?,
        })
    }
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator > 0 {
        quotient + 1
    } else {
        quotient
    }
}
