//! Data models for the Payroll Engine.
//!
//! The `models` module defines the serialisable records kept by the
//! engine (departments, employees and monthly salary records), the
//! inputs used to create and patch them, and the read-side views and
//! summaries derived from them.  Field names are camelCase on the wire.
//! Each record also implements [`Document`](crate::store::Document) so
//! the store knows its unique key, its pre-write validation and how to
//! apply a patch.

use crate::error::{PayrollError, PayrollResult};
use crate::store::Document;
use crate::validation::{compute_net_salary, is_valid_year, uniqueness_key};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque record identity.  Allocated by the store on insert.
pub type Id = Uuid;

/// A record as persisted: identity and timestamps attached by the store,
/// entity fields flattened alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stored<T> {
    pub id: Id,
    /// Set once on insert.
    pub created_at: DateTime<Utc>,
    /// Bumped on every successful update.
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub doc: T,
}

// ── Enumerations ────────────────────────────────────────────────────

/// Gender recorded on an employee.  Any other value is rejected when
/// the request body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Payment state of a salary record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Recorded but not yet processed.  Carries no payment date.
    #[default]
    Pending,
    /// Processed; `payment_date` holds when.
    Paid,
}

/// One of the twelve calendar months, stored by its English name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Month {
    January,
    February,
    March,
    April,
    May,
    June,
    July,
    August,
    September,
    October,
    November,
    December,
}

impl Month {
    /// Calendar order, January first.
    pub const ALL: [Month; 12] = [
        Month::January,
        Month::February,
        Month::March,
        Month::April,
        Month::May,
        Month::June,
        Month::July,
        Month::August,
        Month::September,
        Month::October,
        Month::November,
        Month::December,
    ];

    /// Month for a 1-based month number.
    pub fn from_number(number: u32) -> Option<Month> {
        if (1..=12).contains(&number) {
            Some(Month::ALL[(number - 1) as usize])
        } else {
            None
        }
    }

    /// 1-based month number.
    pub fn number(self) -> u32 {
        self as u32 + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Month::January => "January",
            Month::February => "February",
            Month::March => "March",
            Month::April => "April",
            Month::May => "May",
            Month::June => "June",
            Month::July => "July",
            Month::August => "August",
            Month::September => "September",
            Month::October => "October",
            Month::November => "November",
            Month::December => "December",
        }
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Month {
    type Err = PayrollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Month::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| PayrollError::ValidationFailed(format!("invalid month '{trimmed}'")))
    }
}

/// A payroll cycle: one month of one year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub month: Month,
    pub year: i32,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month.number())
    }
}

// ── Department ──────────────────────────────────────────────────────

/// An organisational unit.  `base_gross_salary` is the default gross pay
/// for every employee assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    /// Short code, unique across departments.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Default monthly gross pay, never negative.
    pub base_gross_salary: f64,
}

/// Partial department update.  `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub base_gross_salary: Option<f64>,
}

/// Department query.  The default matches every department.
#[derive(Debug, Clone, Default)]
pub struct DepartmentFilter {
    pub code: Option<String>,
}

/// Department with the figures derived from its current employees.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentView {
    #[serde(flatten)]
    pub department: Stored<Department>,
    pub employee_count: usize,
    /// `employee_count * base_gross_salary`.
    pub total_department_salary: f64,
}

// ── Employee ────────────────────────────────────────────────────────

/// A person on the payroll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    /// Staff number, unique across employees.
    pub employee_number: String,
    pub first_name: String,
    pub last_name: String,
    pub position: String,
    pub address: String,
    pub telephone: String,
    pub gender: Gender,
    /// Calendar date of hire, `YYYY-MM-DD` on the wire.
    pub hired_date: NaiveDate,
    /// Non-owning reference to the employee's department.
    pub department: Id,
}

impl Employee {
    /// First and last name joined by a space.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Partial employee update.  `None` fields keep their current value; a
/// new `department` must exist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeePatch {
    pub employee_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub address: Option<String>,
    pub telephone: Option<String>,
    pub gender: Option<Gender>,
    pub hired_date: Option<NaiveDate>,
    pub department: Option<Id>,
}

/// Employee query, optionally restricted to one department.
#[derive(Debug, Clone, Default)]
pub struct EmployeeFilter {
    pub department: Option<Id>,
}

/// Employee with its department resolved.  `department_details` is
/// `None` when the reference is dangling.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    #[serde(flatten)]
    pub employee: Stored<Employee>,
    pub full_name: String,
    pub department_details: Option<Stored<Department>>,
}

// ── Salary ──────────────────────────────────────────────────────────

/// Salary of one employee for one period.  `net_salary` is always
/// derived from gross and deduction before the record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Salary {
    /// Non-owning reference to the paid employee.
    pub employee: Id,
    pub gross_salary: f64,
    /// Sum of deductions; at most `gross_salary`.
    pub total_deduction: f64,
    /// `gross_salary - total_deduction`.  Client values are overwritten.
    pub net_salary: f64,
    pub month: Month,
    /// Between 2000 and the current year.
    pub year: i32,
    #[serde(default)]
    pub status: PaymentStatus,
    /// Present exactly when `status` is `Paid`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<DateTime<Utc>>,
}

impl Salary {
    /// The payroll cycle this record belongs to.
    pub fn period(&self) -> Period {
        Period {
            month: self.month,
            year: self.year,
        }
    }
}

/// Salary creation request.
///
/// `month` is either a `YYYY-MM` period (as sent by a month picker) or a
/// month name paired with `year`.  When `gross_salary` is omitted the
/// department's base gross salary is used.  `net_salary` is accepted for
/// compatibility and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSalary {
    pub employee: Id,
    #[serde(default)]
    pub gross_salary: Option<f64>,
    #[serde(default)]
    pub total_deduction: f64,
    #[serde(default)]
    pub net_salary: Option<f64>,
    pub month: String,
    #[serde(default)]
    pub year: Option<i32>,
}

/// Salary edit request as received from clients.  `month` follows the
/// same two forms as [`NewSalary`]; `net_salary` is ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryUpdate {
    pub employee: Option<Id>,
    pub gross_salary: Option<f64>,
    pub total_deduction: Option<f64>,
    pub net_salary: Option<f64>,
    pub month: Option<String>,
    pub year: Option<i32>,
    pub status: Option<PaymentStatus>,
}

/// Typed salary patch applied by the store.  `payment_date` is only set
/// by the engine when a record moves to `Paid`.
#[derive(Debug, Clone, Default)]
pub struct SalaryPatch {
    pub employee: Option<Id>,
    pub gross_salary: Option<f64>,
    pub total_deduction: Option<f64>,
    pub month: Option<Month>,
    pub year: Option<i32>,
    pub status: Option<PaymentStatus>,
    pub payment_date: Option<DateTime<Utc>>,
}

/// Salary query.  Every `Some` field must match.
#[derive(Debug, Clone, Default)]
pub struct SalaryFilter {
    pub employee: Option<Id>,
    pub month: Option<Month>,
    pub year: Option<i32>,
    pub status: Option<PaymentStatus>,
}

impl SalaryFilter {
    pub fn for_period(period: Period) -> Self {
        SalaryFilter {
            month: Some(period.month),
            year: Some(period.year),
            ..Default::default()
        }
    }
}

/// Salary with its employee and (transitively) department resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalaryView {
    #[serde(flatten)]
    pub salary: Stored<Salary>,
    pub employee_details: Option<Stored<Employee>>,
    pub department_details: Option<Stored<Department>>,
}

// ── Payroll summaries ───────────────────────────────────────────────

/// Point-in-time summary of one payroll period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollSummary {
    /// Count of all employees, not filtered by period.
    pub total_employees: usize,
    /// Sum of net salaries of the period's records.
    pub total_salary: f64,
    pub paid_payments: usize,
    pub pending_payments: usize,
    /// Most recently updated records of the period, newest first.
    pub recent_payments: Vec<RecentPayment>,
}

/// One line of [`PayrollSummary::recent_payments`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPayment {
    /// Salary record id.
    pub id: Id,
    /// Employee full name, or "Unknown" for a dangling reference.
    pub employee_name: String,
    /// Net salary.
    pub amount: f64,
    /// Last modification time of the salary record.
    pub payment_date: DateTime<Utc>,
    pub status: PaymentStatus,
}

/// Result of a payroll processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub period: Period,
    /// Records moved from Pending to Paid by this run.
    pub processed: usize,
    /// Records that were already Paid and kept their payment date.
    pub already_paid: usize,
    /// Timestamp stamped on every record processed by this run.
    pub payment_date: DateTime<Utc>,
}

// ── Document impls ──────────────────────────────────────────────────

fn require(field: &str, value: &str) -> PayrollResult<()> {
    if value.trim().is_empty() {
        return Err(PayrollError::ValidationFailed(format!("{field} is required")));
    }
    Ok(())
}

impl Document for Department {
    type Patch = DepartmentPatch;
    type Filter = DepartmentFilter;
    const COLLECTION: &'static str = "departments";

    fn unique_key(&self) -> String {
        self.code.clone()
    }

    fn prepare(&mut self) -> PayrollResult<()> {
        self.code = self.code.trim().to_string();
        require("code", &self.code)?;
        require("name", &self.name)?;
        if !self.base_gross_salary.is_finite() || self.base_gross_salary < 0.0 {
            return Err(PayrollError::ValidationFailed(
                "baseGrossSalary must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, patch: &DepartmentPatch) {
        if let Some(code) = &patch.code {
            self.code = code.clone();
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(base) = patch.base_gross_salary {
            self.base_gross_salary = base;
        }
    }

    fn matches(&self, filter: &DepartmentFilter) -> bool {
        filter.code.as_ref().map_or(true, |c| *c == self.code)
    }
}

impl Document for Employee {
    type Patch = EmployeePatch;
    type Filter = EmployeeFilter;
    const COLLECTION: &'static str = "employees";

    fn unique_key(&self) -> String {
        self.employee_number.clone()
    }

    fn prepare(&mut self) -> PayrollResult<()> {
        self.employee_number = self.employee_number.trim().to_string();
        require("employeeNumber", &self.employee_number)?;
        require("firstName", &self.first_name)?;
        require("lastName", &self.last_name)?;
        require("position", &self.position)?;
        require("address", &self.address)?;
        require("telephone", &self.telephone)?;
        Ok(())
    }

    fn apply(&mut self, patch: &EmployeePatch) {
        let EmployeePatch {
            employee_number,
            first_name,
            last_name,
            position,
            address,
            telephone,
            gender,
            hired_date,
            department,
        } = patch;
        if let Some(v) = employee_number {
            self.employee_number = v.clone();
        }
        if let Some(v) = first_name {
            self.first_name = v.clone();
        }
        if let Some(v) = last_name {
            self.last_name = v.clone();
        }
        if let Some(v) = position {
            self.position = v.clone();
        }
        if let Some(v) = address {
            self.address = v.clone();
        }
        if let Some(v) = telephone {
            self.telephone = v.clone();
        }
        if let Some(v) = gender {
            self.gender = *v;
        }
        if let Some(v) = hired_date {
            self.hired_date = *v;
        }
        if let Some(v) = department {
            self.department = *v;
        }
    }

    fn matches(&self, filter: &EmployeeFilter) -> bool {
        filter.department.map_or(true, |d| d == self.department)
    }
}

impl Document for Salary {
    type Patch = SalaryPatch;
    type Filter = SalaryFilter;
    const COLLECTION: &'static str = "salaries";

    fn unique_key(&self) -> String {
        uniqueness_key(self.employee, self.month, self.year)
    }

    fn prepare(&mut self) -> PayrollResult<()> {
        self.net_salary = compute_net_salary(self.gross_salary, self.total_deduction)?;
        if !is_valid_year(self.year) {
            return Err(PayrollError::ValidationFailed(format!(
                "year {} is outside 2000..=current year",
                self.year
            )));
        }
        if self.status == PaymentStatus::Pending {
            self.payment_date = None;
        }
        Ok(())
    }

    fn apply(&mut self, patch: &SalaryPatch) {
        if let Some(v) = patch.employee {
            self.employee = v;
        }
        if let Some(v) = patch.gross_salary {
            self.gross_salary = v;
        }
        if let Some(v) = patch.total_deduction {
            self.total_deduction = v;
        }
        if let Some(v) = patch.month {
            self.month = v;
        }
        if let Some(v) = patch.year {
            self.year = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.payment_date {
            self.payment_date = Some(v);
        }
    }

    fn matches(&self, filter: &SalaryFilter) -> bool {
        filter.employee.map_or(true, |e| e == self.employee)
            && filter.month.map_or(true, |m| m == self.month)
            && filter.year.map_or(true, |y| y == self.year)
            && filter.status.map_or(true, |s| s == self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn salary(gross: f64, deduction: f64) -> Salary {
        Salary {
            employee: Uuid::new_v4(),
            gross_salary: gross,
            total_deduction: deduction,
            net_salary: 0.0,
            month: Month::June,
            year: 2024,
            status: PaymentStatus::Pending,
            payment_date: None,
        }
    }

    #[test]
    fn month_lookup() {
        assert_eq!(Month::from_number(3), Some(Month::March));
        assert_eq!(Month::from_number(0), None);
        assert_eq!(Month::from_number(13), None);
        assert_eq!(Month::December.number(), 12);
        assert_eq!("march".parse::<Month>().unwrap(), Month::March);
        assert!("Smarch".parse::<Month>().is_err());
    }

    #[test]
    fn period_displays_as_year_month() {
        let period = Period {
            month: Month::June,
            year: 2024,
        };
        assert_eq!(period.to_string(), "2024-06");
    }

    #[test]
    fn salary_prepare_overrides_client_net() {
        let mut s = salary(5000.0, 500.0);
        s.net_salary = 1.0;
        s.prepare().unwrap();
        assert_eq!(s.net_salary, 4500.0);
    }

    proptest! {
        #[test]
        fn salary_prepare_ignores_any_client_net(
            gross in 0.0f64..1.0e9,
            ratio in 0.0f64..=1.0,
            client_net in any::<f64>(),
        ) {
            let mut s = salary(gross, gross * ratio);
            s.net_salary = client_net;
            s.prepare().unwrap();
            prop_assert_eq!(s.net_salary, s.gross_salary - s.total_deduction);
        }
    }

    #[test]
    fn salary_prepare_rejects_deduction_above_gross() {
        let mut s = salary(100.0, 200.0);
        assert!(matches!(s.prepare(), Err(PayrollError::InvalidDeduction(_))));
    }

    #[test]
    fn salary_prepare_rejects_old_year() {
        let mut s = salary(100.0, 0.0);
        s.year = 1999;
        assert!(matches!(s.prepare(), Err(PayrollError::ValidationFailed(_))));
    }

    #[test]
    fn pending_salary_drops_payment_date() {
        let mut s = salary(100.0, 0.0);
        s.payment_date = Some(Utc::now());
        s.prepare().unwrap();
        assert_eq!(s.payment_date, None);
    }

    #[test]
    fn salary_filter_matches_period() {
        let s = salary(100.0, 0.0);
        let june = SalaryFilter::for_period(s.period());
        assert!(s.matches(&june));
        let july = SalaryFilter::for_period(Period {
            month: Month::July,
            year: 2024,
        });
        assert!(!s.matches(&july));
    }

    #[test]
    fn employee_requires_names() {
        let mut e = Employee {
            employee_number: " E1 ".into(),
            first_name: "".into(),
            last_name: "Doe".into(),
            position: "Engineer".into(),
            address: "1 Main St".into(),
            telephone: "555".into(),
            gender: Gender::Female,
            hired_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            department: Uuid::new_v4(),
        };
        assert!(matches!(e.prepare(), Err(PayrollError::ValidationFailed(_))));
        e.first_name = "Jane".into();
        e.prepare().unwrap();
        assert_eq!(e.employee_number, "E1");
        assert_eq!(e.full_name(), "Jane Doe");
    }

    #[test]
    fn department_rejects_negative_base() {
        let mut d = Department {
            code: "ENG".into(),
            name: "Engineering".into(),
            base_gross_salary: -1.0,
        };
        assert!(d.prepare().is_err());
    }

    #[test]
    fn stored_flattens_fields() {
        let now = Utc::now();
        let stored = Stored {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            doc: Department {
                code: "ENG".into(),
                name: "Engineering".into(),
                base_gross_salary: 5000.0,
            },
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["code"], "ENG");
        assert_eq!(json["baseGrossSalary"], 5000.0);
        assert!(json.get("createdAt").is_some());
        assert!(json.get("doc").is_none());
    }
}
