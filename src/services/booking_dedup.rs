//! Reconciles short-term (OwnerRez) stays against manually entered mid-term
//! tenancies so a booking recorded in both systems is only billed once.

use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct StayBooking {
    pub id: String,
    pub guest_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub accommodation_revenue: f64,
    pub total_amount: f64,
    pub cleaning_fee: f64,
    pub pet_fee: f64,
    pub listing_name: String,
}

#[derive(Debug, Clone)]
pub struct MidTermBooking {
    pub id: String,
    pub tenant_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub monthly_rent: f64,
    pub status: String,
}

/// Guest-name comparison policy. Kept injectable because the default
/// heuristic is deliberately loose and may need tightening per market.
pub trait GuestNameMatcher {
    fn is_same_guest(&self, guest_name: &str, tenant_name: &str) -> bool;
}

/// Default policy: the first space-delimited token of either name must be a
/// case-insensitive substring of the other full name. Symmetric, no scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstTokenMatcher;

impl GuestNameMatcher for FirstTokenMatcher {
    fn is_same_guest(&self, guest_name: &str, tenant_name: &str) -> bool {
        let guest = guest_name.trim().to_lowercase();
        let tenant = tenant_name.trim().to_lowercase();
        if guest.is_empty() || tenant.is_empty() {
            return false;
        }
        first_token_contained(&guest, &tenant) || first_token_contained(&tenant, &guest)
    }
}

fn first_token_contained(name: &str, other_full_name: &str) -> bool {
    name.split_whitespace()
        .next()
        .is_some_and(|token| other_full_name.contains(token))
}

fn ranges_overlap(
    start_a: NaiveDate,
    end_a: NaiveDate,
    start_b: NaiveDate,
    end_b: NaiveDate,
) -> bool {
    start_a <= end_b && end_a >= start_b
}

/// Drops every stay that is a duplicate of a mid-term booking: overlapping
/// date range plus a guest-name match. First matching tenancy wins. An empty
/// tenancy list leaves the stays untouched.
pub fn filter_duplicates_with<M: GuestNameMatcher>(
    matcher: &M,
    stays: Vec<StayBooking>,
    mid_term: &[MidTermBooking],
) -> Vec<StayBooking> {
    if mid_term.is_empty() {
        return stays;
    }
    stays
        .into_iter()
        .filter(|stay| {
            let duplicate = mid_term.iter().any(|tenancy| {
                ranges_overlap(
                    stay.check_in,
                    stay.check_out,
                    tenancy.start_date,
                    tenancy.end_date,
                ) && matcher.is_same_guest(&stay.guest_name, &tenancy.tenant_name)
            });
            if duplicate {
                tracing::debug!(
                    booking_id = %stay.id,
                    guest = %stay.guest_name,
                    "Stay excluded as duplicate of a mid-term booking"
                );
            }
            !duplicate
        })
        .collect()
}

pub fn filter_duplicates(
    stays: Vec<StayBooking>,
    mid_term: &[MidTermBooking],
) -> Vec<StayBooking> {
    filter_duplicates_with(&FirstTokenMatcher, stays, mid_term)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{
        filter_duplicates, FirstTokenMatcher, GuestNameMatcher, MidTermBooking, StayBooking,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stay(id: &str, guest: &str, check_in: NaiveDate, check_out: NaiveDate) -> StayBooking {
        StayBooking {
            id: id.to_string(),
            guest_name: guest.to_string(),
            check_in,
            check_out,
            accommodation_revenue: 1000.0,
            total_amount: 1200.0,
            cleaning_fee: 150.0,
            pet_fee: 0.0,
            listing_name: "Peachtree Loft".to_string(),
        }
    }

    fn tenancy(tenant: &str, start: NaiveDate, end: NaiveDate) -> MidTermBooking {
        MidTermBooking {
            id: "mt-1".to_string(),
            tenant_name: tenant.to_string(),
            start_date: start,
            end_date: end,
            monthly_rent: 3100.0,
            status: "active".to_string(),
        }
    }

    #[test]
    fn drops_overlapping_stay_with_matching_guest() {
        let stays = vec![stay(
            "b1",
            "John Smith",
            date(2026, 1, 5),
            date(2026, 1, 12),
        )];
        let tenancies = vec![tenancy("John A Smith", date(2026, 1, 1), date(2026, 1, 31))];
        assert!(filter_duplicates(stays, &tenancies).is_empty());
    }

    #[test]
    fn keeps_stay_when_dates_do_not_overlap() {
        let stays = vec![stay(
            "b1",
            "John Smith",
            date(2026, 2, 5),
            date(2026, 2, 12),
        )];
        let tenancies = vec![tenancy("John A Smith", date(2026, 1, 1), date(2026, 1, 31))];
        assert_eq!(filter_duplicates(stays, &tenancies).len(), 1);
    }

    #[test]
    fn keeps_stay_when_names_differ() {
        let stays = vec![stay(
            "b1",
            "Maria Lopez",
            date(2026, 1, 5),
            date(2026, 1, 12),
        )];
        let tenancies = vec![tenancy("John A Smith", date(2026, 1, 1), date(2026, 1, 31))];
        assert_eq!(filter_duplicates(stays, &tenancies).len(), 1);
    }

    #[test]
    fn empty_tenancy_list_is_identity() {
        let stays = vec![
            stay("b1", "John Smith", date(2026, 1, 5), date(2026, 1, 12)),
            stay("b2", "Maria Lopez", date(2026, 1, 14), date(2026, 1, 20)),
        ];
        assert_eq!(filter_duplicates(stays, &[]).len(), 2);
    }

    #[test]
    fn matching_works_in_both_directions() {
        let matcher = FirstTokenMatcher;
        // Guest's first token inside tenant full name.
        assert!(matcher.is_same_guest("John Smith", "John A Smith"));
        // Tenant's first token inside guest full name.
        assert!(matcher.is_same_guest("Jonathan Smythe", "Jon Smythe-Harris"));
        assert!(matcher.is_same_guest("JOHN SMITH", "john a smith"));
        assert!(!matcher.is_same_guest("Paula Reed", "Quinn Baker"));
        assert!(!matcher.is_same_guest("", "John Smith"));
    }

    #[test]
    fn boundary_overlap_counts_as_duplicate() {
        // Stay ends on the tenancy's first day: start_a <= end_b && end_a >= start_b.
        let stays = vec![stay(
            "b1",
            "John Smith",
            date(2025, 12, 28),
            date(2026, 1, 1),
        )];
        let tenancies = vec![tenancy("John A Smith", date(2026, 1, 1), date(2026, 1, 31))];
        assert!(filter_duplicates(stays, &tenancies).is_empty());
    }
}
