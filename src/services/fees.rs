//! Management-fee calculation: percentage of revenue with a tiered flat
//! floor. Pure and deterministic so a finalized reconciliation can always be
//! recomputed from its inputs.

use super::revenue::round2;

/// Fee tiers and default percentage, passed in explicitly rather than read
/// from ambient state mid-calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeSchedule {
    pub default_percentage: f64,
    /// Minimum when the average nightly rate is below `low_rate_ceiling`.
    pub low_tier_minimum: f64,
    /// Minimum when the nightly rate is within `low_rate_ceiling..=mid_rate_ceiling`.
    pub mid_tier_minimum: f64,
    /// Minimum when the nightly rate exceeds `mid_rate_ceiling`.
    pub high_tier_minimum: f64,
    pub low_rate_ceiling: f64,
    pub mid_rate_ceiling: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            default_percentage: 15.0,
            low_tier_minimum: 250.0,
            mid_tier_minimum: 400.0,
            high_tier_minimum: 750.0,
            low_rate_ceiling: 200.0,
            mid_rate_ceiling: 400.0,
        }
    }
}

impl FeeSchedule {
    pub fn with_default_percentage(percentage: f64) -> Self {
        Self {
            default_percentage: percentage,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeeInputs {
    pub accommodation_revenue_total: f64,
    pub mid_term_revenue: f64,
    pub total_nights: i64,
    /// Per-property override; falls back to the schedule default when unset.
    pub management_fee_percentage: Option<f64>,
    pub has_mid_term_occupancy: bool,
    pub is_property_live: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeOutcome {
    pub management_fee_base: f64,
    pub nightly_rate: f64,
    pub order_minimum_fee: f64,
    pub management_fee: f64,
}

pub fn calculate(schedule: &FeeSchedule, inputs: &FeeInputs) -> FeeOutcome {
    let base = inputs.accommodation_revenue_total + inputs.mid_term_revenue;
    let percentage = inputs
        .management_fee_percentage
        .filter(|value| *value > 0.0)
        .unwrap_or(schedule.default_percentage);

    let nightly_rate = if inputs.total_nights > 0 {
        inputs.accommodation_revenue_total / inputs.total_nights as f64
    } else {
        0.0
    };

    // The flat floor only applies to live listings with no concurrent
    // mid-term tenant; otherwise the percentage stands alone.
    let order_minimum_fee = if inputs.is_property_live && !inputs.has_mid_term_occupancy {
        if nightly_rate < schedule.low_rate_ceiling {
            schedule.low_tier_minimum
        } else if nightly_rate <= schedule.mid_rate_ceiling {
            schedule.mid_tier_minimum
        } else {
            schedule.high_tier_minimum
        }
    } else {
        0.0
    };

    let percentage_fee = base * percentage / 100.0;
    FeeOutcome {
        management_fee_base: round2(base),
        nightly_rate: round2(nightly_rate),
        order_minimum_fee,
        management_fee: round2(percentage_fee.max(order_minimum_fee)),
    }
}

#[cfg(test)]
mod tests {
    use super::{calculate, FeeInputs, FeeOutcome, FeeSchedule};

    fn inputs() -> FeeInputs {
        FeeInputs {
            accommodation_revenue_total: 3500.0,
            mid_term_revenue: 0.0,
            total_nights: 10,
            management_fee_percentage: None,
            has_mid_term_occupancy: false,
            is_property_live: true,
        }
    }

    #[test]
    fn mid_tier_minimum_beats_low_percentage_fee() {
        // 3500 over 10 nights = 350/night → 400 floor; 15% of 3500 = 525 > 400,
        // so force a lower percentage to exercise the floor.
        let outcome = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                management_fee_percentage: Some(8.0),
                ..inputs()
            },
        );
        assert_eq!(outcome.nightly_rate, 350.0);
        assert_eq!(outcome.order_minimum_fee, 400.0);
        // 8% of 3500 = 280 < 400.
        assert_eq!(outcome.management_fee, 400.0);
    }

    #[test]
    fn percentage_fee_wins_when_above_minimum() {
        let outcome = calculate(&FeeSchedule::default(), &inputs());
        assert_eq!(outcome.order_minimum_fee, 400.0);
        assert_eq!(outcome.management_fee, 525.0);
    }

    #[test]
    fn no_minimum_when_property_not_live() {
        let outcome = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                is_property_live: false,
                management_fee_percentage: Some(8.0),
                ..inputs()
            },
        );
        assert_eq!(outcome.order_minimum_fee, 0.0);
        assert_eq!(outcome.management_fee, 280.0);
    }

    #[test]
    fn no_minimum_with_mid_term_occupancy() {
        let outcome = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                has_mid_term_occupancy: true,
                mid_term_revenue: 1700.0,
                ..inputs()
            },
        );
        assert_eq!(outcome.order_minimum_fee, 0.0);
        assert_eq!(outcome.management_fee_base, 5200.0);
        assert_eq!(outcome.management_fee, 780.0);
    }

    #[test]
    fn tier_boundaries() {
        let low = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                accommodation_revenue_total: 1990.0,
                total_nights: 10,
                management_fee_percentage: Some(1.0),
                ..inputs()
            },
        );
        assert_eq!(low.order_minimum_fee, 250.0);

        let at_200 = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                accommodation_revenue_total: 2000.0,
                total_nights: 10,
                management_fee_percentage: Some(1.0),
                ..inputs()
            },
        );
        assert_eq!(at_200.order_minimum_fee, 400.0);

        let at_400 = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                accommodation_revenue_total: 4000.0,
                total_nights: 10,
                management_fee_percentage: Some(1.0),
                ..inputs()
            },
        );
        assert_eq!(at_400.order_minimum_fee, 400.0);

        let high = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                accommodation_revenue_total: 4010.0,
                total_nights: 10,
                management_fee_percentage: Some(1.0),
                ..inputs()
            },
        );
        assert_eq!(high.order_minimum_fee, 750.0);
    }

    #[test]
    fn zero_nights_lands_in_low_tier() {
        let outcome = calculate(
            &FeeSchedule::default(),
            &FeeInputs {
                accommodation_revenue_total: 0.0,
                total_nights: 0,
                management_fee_percentage: Some(15.0),
                ..inputs()
            },
        );
        assert_eq!(outcome.nightly_rate, 0.0);
        assert_eq!(outcome.order_minimum_fee, 250.0);
        assert_eq!(outcome.management_fee, 250.0);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let first = calculate(&FeeSchedule::default(), &inputs());
        let second = calculate(&FeeSchedule::default(), &inputs());
        assert_eq!(
            first,
            FeeOutcome {
                management_fee_base: 3500.0,
                nightly_rate: 350.0,
                order_minimum_fee: 400.0,
                management_fee: 525.0,
            }
        );
        assert_eq!(first, second);
    }
}
