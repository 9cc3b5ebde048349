//! Pure revenue aggregation for one property-month: short-term stay revenue,
//! pass-through fees, night counts, and prorated mid-term rent.

use chrono::{Datelike, Days, NaiveDate};

use super::booking_dedup::{MidTermBooking, StayBooking};

/// Inclusive calendar-month window a reconciliation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthWindow {
    /// Window of the month containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
        let next_month = if date.month() == 12 {
            NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        };
        let end = next_month
            .and_then(|first| first.checked_sub_days(Days::new(1)))
            .unwrap_or(start);
        Self { start, end }
    }

    pub fn days_in_month(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// True once the month has fully elapsed relative to `today`.
    pub fn has_ended(&self, today: NaiveDate) -> bool {
        today > self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevenueBreakdown {
    pub short_term_revenue: f64,
    pub mid_term_revenue: f64,
    pub total_revenue: f64,
    pub accommodation_revenue_total: f64,
    pub cleaning_fees_total: f64,
    pub pet_fees_total: f64,
    pub total_nights: i64,
}

/// Effective revenue of a stay: accommodation revenue when set, otherwise the
/// booking total. Callers only count strictly positive results.
pub fn stay_revenue(stay: &StayBooking) -> f64 {
    if stay.accommodation_revenue > 0.0 {
        stay.accommodation_revenue
    } else {
        stay.total_amount
    }
}

/// Rent share of `tenancy` that falls inside `window`, with inclusive day
/// counting: effective_start..=effective_end over days_in_month.
pub fn prorated_rent(tenancy: &MidTermBooking, window: &MonthWindow) -> f64 {
    let effective_start = tenancy.start_date.max(window.start);
    let effective_end = tenancy.end_date.min(window.end);
    let days_occupied = (effective_end - effective_start).num_days() + 1;
    if days_occupied <= 0 {
        return 0.0;
    }
    tenancy.monthly_rent * days_occupied as f64 / window.days_in_month() as f64
}

pub fn aggregate(
    stays: &[StayBooking],
    mid_term: &[MidTermBooking],
    window: &MonthWindow,
) -> RevenueBreakdown {
    let mut breakdown = RevenueBreakdown::default();

    for stay in stays {
        let revenue = stay_revenue(stay);
        if revenue > 0.0 {
            breakdown.short_term_revenue += revenue;
        }
        if stay.accommodation_revenue > 0.0 {
            breakdown.accommodation_revenue_total += stay.accommodation_revenue;
        }
        breakdown.cleaning_fees_total += stay.cleaning_fee.max(0.0);
        breakdown.pet_fees_total += stay.pet_fee.max(0.0);

        let nights = (stay.check_out - stay.check_in).num_days();
        if nights > 0 {
            breakdown.total_nights += nights;
        }
    }

    for tenancy in mid_term {
        breakdown.mid_term_revenue += prorated_rent(tenancy, window);
    }

    breakdown.short_term_revenue = round2(breakdown.short_term_revenue);
    breakdown.mid_term_revenue = round2(breakdown.mid_term_revenue);
    breakdown.accommodation_revenue_total = round2(breakdown.accommodation_revenue_total);
    breakdown.cleaning_fees_total = round2(breakdown.cleaning_fees_total);
    breakdown.pet_fees_total = round2(breakdown.pet_fees_total);
    breakdown.total_revenue = round2(breakdown.short_term_revenue + breakdown.mid_term_revenue);
    breakdown
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::super::booking_dedup::{MidTermBooking, StayBooking};
    use super::{aggregate, prorated_rent, MonthWindow};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stay(acc: f64, total: f64, check_in: NaiveDate, check_out: NaiveDate) -> StayBooking {
        StayBooking {
            id: "b1".to_string(),
            guest_name: "Guest".to_string(),
            check_in,
            check_out,
            accommodation_revenue: acc,
            total_amount: total,
            cleaning_fee: 0.0,
            pet_fee: 0.0,
            listing_name: String::new(),
        }
    }

    fn tenancy(rent: f64, start: NaiveDate, end: NaiveDate) -> MidTermBooking {
        MidTermBooking {
            id: "mt1".to_string(),
            tenant_name: "Tenant".to_string(),
            start_date: start,
            end_date: end,
            monthly_rent: rent,
            status: "active".to_string(),
        }
    }

    #[test]
    fn month_window_covers_whole_month() {
        let window = MonthWindow::containing(date(2026, 1, 15));
        assert_eq!(window.start, date(2026, 1, 1));
        assert_eq!(window.end, date(2026, 1, 31));
        assert_eq!(window.days_in_month(), 31);

        let december = MonthWindow::containing(date(2025, 12, 1));
        assert_eq!(december.end, date(2025, 12, 31));

        let february = MonthWindow::containing(date(2024, 2, 10));
        assert_eq!(february.days_in_month(), 29);
    }

    #[test]
    fn month_end_gate() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        assert!(!window.has_ended(date(2026, 1, 31)));
        assert!(window.has_ended(date(2026, 2, 1)));
    }

    #[test]
    fn prorates_partial_month_inclusively() {
        // Jan 15 – Feb 15 at 3100/month inside January: days 15..=31 = 17 days.
        let window = MonthWindow::containing(date(2026, 1, 1));
        let rent = prorated_rent(&tenancy(3100.0, date(2026, 1, 15), date(2026, 2, 15)), &window);
        assert!((rent - 3100.0 * 17.0 / 31.0).abs() < 1e-9);
    }

    #[test]
    fn full_month_tenancy_pays_full_rent() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let rent = prorated_rent(&tenancy(3100.0, date(2025, 11, 1), date(2026, 3, 31)), &window);
        assert!((rent - 3100.0).abs() < 1e-9);
    }

    #[test]
    fn non_overlapping_tenancy_contributes_nothing() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let rent = prorated_rent(&tenancy(3100.0, date(2026, 3, 1), date(2026, 4, 1)), &window);
        assert_eq!(rent, 0.0);
    }

    #[test]
    fn falls_back_to_total_amount_when_accommodation_unset() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let stays = vec![stay(0.0, 900.0, date(2026, 1, 2), date(2026, 1, 5))];
        let breakdown = aggregate(&stays, &[], &window);
        assert_eq!(breakdown.short_term_revenue, 900.0);
        // Fallback amounts do not enter the accommodation (fee-base) total.
        assert_eq!(breakdown.accommodation_revenue_total, 0.0);
        assert_eq!(breakdown.total_nights, 3);
    }

    #[test]
    fn skips_non_positive_revenue_and_nights() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let stays = vec![
            stay(0.0, 0.0, date(2026, 1, 2), date(2026, 1, 2)),
            stay(-50.0, -50.0, date(2026, 1, 10), date(2026, 1, 9)),
        ];
        let breakdown = aggregate(&stays, &[], &window);
        assert_eq!(breakdown.short_term_revenue, 0.0);
        assert_eq!(breakdown.total_nights, 0);
    }

    #[test]
    fn accumulates_pass_through_fees_separately() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let mut with_fees = stay(1000.0, 1300.0, date(2026, 1, 2), date(2026, 1, 6));
        with_fees.cleaning_fee = 150.0;
        with_fees.pet_fee = 75.0;
        let breakdown = aggregate(&[with_fees], &[], &window);
        assert_eq!(breakdown.short_term_revenue, 1000.0);
        assert_eq!(breakdown.cleaning_fees_total, 150.0);
        assert_eq!(breakdown.pet_fees_total, 75.0);
        // Fees stay out of revenue.
        assert_eq!(breakdown.total_revenue, 1000.0);
    }

    #[test]
    fn combines_short_and_mid_term_revenue() {
        let window = MonthWindow::containing(date(2026, 1, 1));
        let stays = vec![stay(1000.0, 1200.0, date(2026, 1, 2), date(2026, 1, 6))];
        let tenancies = vec![tenancy(3100.0, date(2026, 1, 15), date(2026, 2, 15))];
        let breakdown = aggregate(&stays, &tenancies, &window);
        assert_eq!(breakdown.short_term_revenue, 1000.0);
        assert_eq!(breakdown.mid_term_revenue, 1700.0);
        assert_eq!(breakdown.total_revenue, 2700.0);
    }
}
