//! Validation and derivation rules.
//!
//! Pure functions shared by the models and the payroll service: net
//! salary derivation, `YYYY-MM` period parsing, the accepted year range
//! and the compound uniqueness key of salary records.

use crate::error::{PayrollError, PayrollResult};
use crate::models::{Id, Month, Period};
use chrono::{Datelike, Utc};

/// Earliest year a salary record may belong to.
pub const MIN_YEAR: i32 = 2000;

/// Net salary for the given gross pay and total deduction.
///
/// Fails with [`PayrollError::InvalidDeduction`] when either amount is
/// negative or not finite, or when the deduction exceeds the gross pay.
pub fn compute_net_salary(gross: f64, deduction: f64) -> PayrollResult<f64> {
    if !gross.is_finite() || gross < 0.0 {
        return Err(PayrollError::InvalidDeduction(format!(
            "gross salary must be a non-negative number, got {gross}"
        )));
    }
    if !deduction.is_finite() || deduction < 0.0 {
        return Err(PayrollError::InvalidDeduction(format!(
            "total deduction must be a non-negative number, got {deduction}"
        )));
    }
    if deduction > gross {
        return Err(PayrollError::InvalidDeduction(format!(
            "total deduction {deduction} cannot be greater than gross salary {gross}"
        )));
    }
    Ok(gross - deduction)
}

/// Parse a `YYYY-MM` string into a [`Period`].
///
/// The year must be exactly four ASCII digits and the month exactly two;
/// surrounding whitespace is ignored.
pub fn parse_period(input: &str) -> PayrollResult<Period> {
    let invalid = || PayrollError::InvalidPeriod(format!("expected YYYY-MM, got '{input}'"));

    let (year_part, month_part) = input.trim().split_once('-').ok_or_else(invalid)?;
    if !all_digits(year_part, 4) || !all_digits(month_part, 2) {
        return Err(invalid());
    }
    let year: i32 = year_part.parse().map_err(|_| invalid())?;
    let month_number: u32 = month_part.parse().map_err(|_| invalid())?;
    let month = Month::from_number(month_number).ok_or_else(|| {
        PayrollError::InvalidPeriod(format!("month {month_number} is not in 1..=12"))
    })?;

    Ok(Period { month, year })
}

fn all_digits(part: &str, len: usize) -> bool {
    part.len() == len && part.bytes().all(|b| b.is_ascii_digit())
}

pub fn current_year() -> i32 {
    Utc::now().year()
}

/// `true` iff `MIN_YEAR <= year <= current`.
pub fn year_in_range(year: i32, current: i32) -> bool {
    (MIN_YEAR..=current).contains(&year)
}

pub fn is_valid_year(year: i32) -> bool {
    year_in_range(year, current_year())
}

/// Key enforcing one salary record per employee and period.
pub fn uniqueness_key(employee: Id, month: Month, year: i32) -> String {
    format!("{employee}:{year:04}:{}", month.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    #[test]
    fn net_salary_is_gross_minus_deduction() {
        for (gross, deduction) in [(5000.0, 500.0), (0.0, 0.0), (1200.5, 1200.5), (10.0, 0.0)] {
            assert_eq!(compute_net_salary(gross, deduction).unwrap(), gross - deduction);
        }
    }

    proptest! {
        #[test]
        fn net_salary_holds_for_any_valid_pair(gross in 0.0f64..1.0e9, ratio in 0.0f64..=1.0) {
            let deduction = gross * ratio;
            let net = compute_net_salary(gross, deduction).unwrap();
            prop_assert_eq!(net, gross - deduction);
            prop_assert!(net >= 0.0);
        }

        #[test]
        fn any_deduction_above_gross_is_rejected(gross in 0.0f64..1.0e9, excess in 1.0e-3f64..1.0e6) {
            let result = compute_net_salary(gross, gross + excess);
            prop_assert!(matches!(result, Err(PayrollError::InvalidDeduction(_))));
        }
    }

    #[test]
    fn deduction_above_gross_is_rejected() {
        let err = compute_net_salary(100.0, 100.01).unwrap_err();
        assert!(matches!(err, PayrollError::InvalidDeduction(_)));
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert!(matches!(
            compute_net_salary(-1.0, 0.0),
            Err(PayrollError::InvalidDeduction(_))
        ));
        assert!(matches!(
            compute_net_salary(100.0, -5.0),
            Err(PayrollError::InvalidDeduction(_))
        ));
        assert!(compute_net_salary(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn parses_year_month() {
        let period = parse_period("2024-03").unwrap();
        assert_eq!(period.month, Month::March);
        assert_eq!(period.year, 2024);
        assert_eq!(parse_period(" 2023-12 ").unwrap().month, Month::December);
    }

    #[test]
    fn rejects_bad_periods() {
        for input in ["2024-13", "2024-00", "2024", "abcd-03", "2024-xx", "", "2024-03-01"] {
            assert!(
                matches!(parse_period(input), Err(PayrollError::InvalidPeriod(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn period_parts_must_be_fixed_width_digits() {
        for input in ["2024-+3", "+2024-03", "2024-003", "02024-03", "2024-3", "24-03", "2024- 3"] {
            assert!(
                matches!(parse_period(input), Err(PayrollError::InvalidPeriod(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn year_range() {
        assert!(year_in_range(2000, 2024));
        assert!(year_in_range(2024, 2024));
        assert!(!year_in_range(1999, 2024));
        assert!(!year_in_range(2025, 2024));
        assert!(is_valid_year(current_year()));
        assert!(!is_valid_year(current_year() + 1));
    }

    #[test]
    fn uniqueness_key_distinguishes_periods() {
        let employee = Uuid::new_v4();
        let a = uniqueness_key(employee, Month::March, 2024);
        assert_eq!(a, uniqueness_key(employee, Month::March, 2024));
        assert_ne!(a, uniqueness_key(employee, Month::April, 2024));
        assert_ne!(a, uniqueness_key(employee, Month::March, 2023));
        assert_ne!(a, uniqueness_key(Uuid::new_v4(), Month::March, 2024));
    }
}
