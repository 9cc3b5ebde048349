//! Line-item delta computation: given the keys already present on a
//! reconciliation, produce exactly the missing items. The existing-key set is
//! rebuilt from the database on every invocation, never cached, which is what
//! makes a re-run a no-op.

use std::collections::HashSet;

use chrono::NaiveDate;

use super::booking_dedup::StayBooking;
use super::revenue::{round2, stay_revenue, MonthWindow};

pub const ITEM_TYPE_BOOKING: &str = "booking";
pub const ITEM_TYPE_PASS_THROUGH_FEE: &str = "pass_through_fee";
pub const ITEM_TYPE_EXPENSE: &str = "expense";
pub const ITEM_TYPE_VISIT: &str = "visit";

/// Expense purposes that belong to the Visit flow. Expenses matching any of
/// these are skipped so the same visit is never billed twice.
const VISIT_PURPOSE_MARKERS: &[&str] =
    &["visit fee", "visit charge", "hourly charge", "property visit"];

#[derive(Debug, Clone)]
pub struct ExpenseRecord {
    pub id: String,
    pub amount: f64,
    pub purpose: String,
    pub expense_date: NaiveDate,
    pub category: String,
    pub exported: bool,
}

#[derive(Debug, Clone)]
pub struct VisitRecord {
    pub id: String,
    pub price: f64,
    pub purpose: String,
    pub visit_date: NaiveDate,
    pub billed: bool,
}

/// One line item to be inserted. Amounts are signed: positive is owner
/// revenue, negative is a cost or a fee owed onward.
#[derive(Debug, Clone)]
pub struct NewLineItem {
    pub item_type: &'static str,
    pub item_id: String,
    pub amount: f64,
    pub item_date: NaiveDate,
    pub category: String,
    pub fee_type: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct LineItemDelta {
    pub items: Vec<NewLineItem>,
    pub booking_count: usize,
    pub expense_count: usize,
    pub visit_count: usize,
    /// Source ids whose `exported` / `billed` flag must flip with the insert.
    pub folded_expense_ids: Vec<String>,
    pub folded_visit_ids: Vec<String>,
}

pub fn item_key(item_type: &str, item_id: &str) -> String {
    format!("{item_type}:{item_id}")
}

pub fn is_visit_purpose(purpose: &str) -> bool {
    let normalized = purpose.to_lowercase();
    VISIT_PURPOSE_MARKERS
        .iter()
        .any(|marker| normalized.contains(marker))
}

pub fn compute_delta(
    existing_keys: &HashSet<String>,
    stays: &[StayBooking],
    expenses: &[ExpenseRecord],
    visits: &[VisitRecord],
    window: &MonthWindow,
) -> LineItemDelta {
    let mut delta = LineItemDelta::default();

    for stay in stays {
        let revenue = stay_revenue(stay);
        if revenue > 0.0 && !existing_keys.contains(&item_key(ITEM_TYPE_BOOKING, &stay.id)) {
            delta.items.push(NewLineItem {
                item_type: ITEM_TYPE_BOOKING,
                item_id: stay.id.clone(),
                amount: round2(revenue),
                item_date: stay.check_in,
                category: "booking".to_string(),
                fee_type: None,
                description: format!("{} — {}", stay.guest_name, stay.listing_name),
            });
            delta.booking_count += 1;
        }

        let cleaning_id = format!("{}_cleaning", stay.id);
        if stay.cleaning_fee > 0.0
            && !existing_keys.contains(&item_key(ITEM_TYPE_PASS_THROUGH_FEE, &cleaning_id))
        {
            delta.items.push(NewLineItem {
                item_type: ITEM_TYPE_PASS_THROUGH_FEE,
                item_id: cleaning_id,
                amount: round2(-stay.cleaning_fee),
                item_date: stay.check_in,
                category: "pass_through_fee".to_string(),
                fee_type: Some("cleaning".to_string()),
                description: format!("Cleaning fee — {}", stay.guest_name),
            });
        }

        let pet_id = format!("{}_pet", stay.id);
        if stay.pet_fee > 0.0
            && !existing_keys.contains(&item_key(ITEM_TYPE_PASS_THROUGH_FEE, &pet_id))
        {
            delta.items.push(NewLineItem {
                item_type: ITEM_TYPE_PASS_THROUGH_FEE,
                item_id: pet_id,
                amount: round2(-stay.pet_fee),
                item_date: stay.check_in,
                category: "pass_through_fee".to_string(),
                fee_type: Some("pet".to_string()),
                description: format!("Pet fee — {}", stay.guest_name),
            });
        }
    }

    for expense in expenses {
        if expense.exported || !window.contains(expense.expense_date) {
            continue;
        }
        // Visit charges are billed through the Visit flow only.
        if is_visit_purpose(&expense.purpose) {
            tracing::debug!(
                expense_id = %expense.id,
                purpose = %expense.purpose,
                "Expense skipped: visit charges are billed via visits"
            );
            continue;
        }
        if existing_keys.contains(&item_key(ITEM_TYPE_EXPENSE, &expense.id)) {
            continue;
        }
        delta.items.push(NewLineItem {
            item_type: ITEM_TYPE_EXPENSE,
            item_id: expense.id.clone(),
            amount: round2(-expense.amount.abs()),
            item_date: expense.expense_date,
            category: if expense.category.trim().is_empty() {
                "expense".to_string()
            } else {
                expense.category.clone()
            },
            fee_type: None,
            description: expense.purpose.clone(),
        });
        delta.expense_count += 1;
        delta.folded_expense_ids.push(expense.id.clone());
    }

    for visit in visits {
        if visit.billed
            || !window.contains(visit.visit_date)
            || existing_keys.contains(&item_key(ITEM_TYPE_VISIT, &visit.id))
        {
            continue;
        }
        delta.items.push(NewLineItem {
            item_type: ITEM_TYPE_VISIT,
            item_id: visit.id.clone(),
            amount: round2(-visit.price.abs()),
            item_date: visit.visit_date,
            category: "visit".to_string(),
            fee_type: None,
            description: visit.purpose.clone(),
        });
        delta.visit_count += 1;
        delta.folded_visit_ids.push(visit.id.clone());
    }

    delta
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveDate;

    use super::super::booking_dedup::StayBooking;
    use super::super::revenue::MonthWindow;
    use super::{compute_delta, is_visit_purpose, item_key, ExpenseRecord, VisitRecord};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn window() -> MonthWindow {
        MonthWindow::containing(date(2026, 1, 1))
    }

    fn stay() -> StayBooking {
        StayBooking {
            id: "b1".to_string(),
            guest_name: "John Smith".to_string(),
            check_in: date(2026, 1, 5),
            check_out: date(2026, 1, 12),
            accommodation_revenue: 1400.0,
            total_amount: 1625.0,
            cleaning_fee: 150.0,
            pet_fee: 75.0,
            listing_name: "Peachtree Loft".to_string(),
        }
    }

    fn expense(id: &str, purpose: &str) -> ExpenseRecord {
        ExpenseRecord {
            id: id.to_string(),
            amount: 80.0,
            purpose: purpose.to_string(),
            expense_date: date(2026, 1, 10),
            category: "maintenance".to_string(),
            exported: false,
        }
    }

    fn visit(id: &str) -> VisitRecord {
        VisitRecord {
            id: id.to_string(),
            price: 100.0,
            purpose: "Monthly walkthrough".to_string(),
            visit_date: date(2026, 1, 20),
            billed: false,
        }
    }

    #[test]
    fn creates_booking_and_pass_through_items() {
        let delta = compute_delta(&HashSet::new(), &[stay()], &[], &[], &window());
        assert_eq!(delta.items.len(), 3);
        assert_eq!(delta.booking_count, 1);

        let booking = &delta.items[0];
        assert_eq!(booking.item_type, "booking");
        assert_eq!(booking.amount, 1400.0);

        let cleaning = &delta.items[1];
        assert_eq!(cleaning.item_type, "pass_through_fee");
        assert_eq!(cleaning.item_id, "b1_cleaning");
        assert_eq!(cleaning.amount, -150.0);

        let pet = &delta.items[2];
        assert_eq!(pet.item_id, "b1_pet");
        assert_eq!(pet.amount, -75.0);
    }

    #[test]
    fn existing_keys_suppress_reinsertion() {
        let mut existing = HashSet::new();
        existing.insert(item_key("booking", "b1"));
        existing.insert(item_key("pass_through_fee", "b1_cleaning"));
        existing.insert(item_key("pass_through_fee", "b1_pet"));
        existing.insert(item_key("expense", "e1"));
        existing.insert(item_key("visit", "v1"));

        let delta = compute_delta(
            &existing,
            &[stay()],
            &[expense("e1", "Lightbulbs")],
            &[visit("v1")],
            &window(),
        );
        assert!(delta.items.is_empty());
        assert_eq!(delta.expense_count, 0);
        assert_eq!(delta.visit_count, 0);
    }

    #[test]
    fn visit_purposed_expenses_are_never_inserted() {
        let delta = compute_delta(
            &HashSet::new(),
            &[],
            &[expense("e1", "Visit fee - John, 2 hrs @ $50/hr")],
            &[],
            &window(),
        );
        assert!(delta.items.is_empty());
        assert!(delta.folded_expense_ids.is_empty());
    }

    #[test]
    fn visit_purpose_markers_match_case_insensitively() {
        assert!(is_visit_purpose("VISIT FEE - weekly"));
        assert!(is_visit_purpose("Hourly Charge for inspection"));
        assert!(is_visit_purpose("property visit 1/15"));
        assert!(is_visit_purpose("Visit charge"));
        assert!(!is_visit_purpose("Plumber visit invoice")); // no marker phrase
        assert!(!is_visit_purpose("HVAC repair"));
    }

    #[test]
    fn expenses_and_visits_become_negative_items() {
        let delta = compute_delta(
            &HashSet::new(),
            &[],
            &[expense("e1", "Lightbulbs")],
            &[visit("v1")],
            &window(),
        );
        assert_eq!(delta.items.len(), 2);
        assert_eq!(delta.items[0].amount, -80.0);
        assert_eq!(delta.items[1].amount, -100.0);
        assert_eq!(delta.folded_expense_ids, vec!["e1".to_string()]);
        assert_eq!(delta.folded_visit_ids, vec!["v1".to_string()]);
    }

    #[test]
    fn out_of_month_and_flagged_sources_are_skipped() {
        let mut stale = expense("e1", "Lightbulbs");
        stale.expense_date = date(2025, 12, 30);
        let mut already = expense("e2", "Filters");
        already.exported = true;
        let mut billed_visit = visit("v1");
        billed_visit.billed = true;

        let delta = compute_delta(
            &HashSet::new(),
            &[],
            &[stale, already],
            &[billed_visit],
            &window(),
        );
        assert!(delta.items.is_empty());
    }

    #[test]
    fn zero_fee_stays_produce_no_pass_through_items() {
        let mut bare = stay();
        bare.cleaning_fee = 0.0;
        bare.pet_fee = 0.0;
        let delta = compute_delta(&HashSet::new(), &[bare], &[], &[], &window());
        assert_eq!(delta.items.len(), 1);
        assert_eq!(delta.items[0].item_type, "booking");
    }
}
