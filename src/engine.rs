//! Payroll service.
//!
//! [`PayrollEngine`] is the entry point used by the API: record keeping
//! for departments, employees and salaries, the monthly payroll summary
//! and the bulk "process payroll" transition.  Every method takes the
//! session [`Principal`] explicitly; the engine never reads ambient
//! session state.  All reads go straight to the [`Store`].
//!
//! Deleting a department that still has employees, or an employee that
//! still has salary records, is refused with
//! [`PayrollError::ReferentialConflict`].  Reads tolerate dangling
//! references anyway (records restored from an older snapshot), showing
//! them as missing details or as `"Unknown"` in summaries.

use crate::auth::Principal;
use crate::error::{PayrollError, PayrollResult};
use crate::models::{
    Department, DepartmentFilter, DepartmentPatch, DepartmentView, Employee, EmployeeFilter,
    EmployeePatch, EmployeeView, Id, Month, NewSalary, PaymentStatus, PayrollSummary, Period,
    ProcessOutcome, RecentPayment, Salary, SalaryFilter, SalaryPatch, SalaryUpdate, SalaryView,
    Stored,
};
use crate::store::Store;
use crate::validation::parse_period;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of entries in [`PayrollSummary::recent_payments`].
pub const RECENT_PAYMENTS_LIMIT: usize = 10;

/// Shown in summaries when a salary's employee no longer exists.
pub const UNKNOWN_EMPLOYEE: &str = "Unknown";

pub struct PayrollEngine<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for PayrollEngine<S> {
    fn clone(&self) -> Self {
        PayrollEngine {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> PayrollEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        PayrollEngine { store }
    }

    // ── Departments ─────────────────────────────────────────────────

    pub fn list_departments(&self, _principal: &Principal) -> PayrollResult<Vec<DepartmentView>> {
        let departments = self.store.departments().find_many(&DepartmentFilter::default())?;
        let mut headcount: HashMap<Id, usize> = HashMap::new();
        for employee in self.store.employees().find_many(&EmployeeFilter::default())? {
            *headcount.entry(employee.doc.department).or_default() += 1;
        }
        Ok(departments
            .into_iter()
            .map(|d| {
                let count = headcount.get(&d.id).copied().unwrap_or(0);
                department_view(d, count)
            })
            .collect())
    }

    pub fn get_department(&self, _principal: &Principal, id: Id) -> PayrollResult<DepartmentView> {
        let department = self.require_department(id)?;
        self.with_headcount(department)
    }

    pub fn create_department(
        &self,
        principal: &Principal,
        department: Department,
    ) -> PayrollResult<DepartmentView> {
        let stored = self.store.departments().insert(department)?;
        info!(actor = %principal.email, id = %stored.id, code = %stored.doc.code, "department created");
        Ok(department_view(stored, 0))
    }

    pub fn update_department(
        &self,
        principal: &Principal,
        id: Id,
        patch: &DepartmentPatch,
    ) -> PayrollResult<DepartmentView> {
        let stored = self.store.departments().update(id, patch)?;
        info!(actor = %principal.email, %id, "department updated");
        self.with_headcount(stored)
    }

    pub fn delete_department(&self, principal: &Principal, id: Id) -> PayrollResult<()> {
        self.require_department(id)?;
        let assigned = self.store.employees().count(&EmployeeFilter {
            department: Some(id),
        })?;
        if assigned > 0 {
            return Err(PayrollError::ReferentialConflict(format!(
                "department '{id}' still has {assigned} employee(s)"
            )));
        }
        self.store.departments().delete(id)?;
        info!(actor = %principal.email, %id, "department deleted");
        Ok(())
    }

    // ── Employees ───────────────────────────────────────────────────

    pub fn list_employees(&self, _principal: &Principal) -> PayrollResult<Vec<EmployeeView>> {
        let departments = self.department_index()?;
        let employees = self.store.employees().find_many(&EmployeeFilter::default())?;
        Ok(employees
            .into_iter()
            .map(|e| {
                let department = departments.get(&e.doc.department).cloned();
                employee_view(e, department)
            })
            .collect())
    }

    pub fn get_employee(&self, _principal: &Principal, id: Id) -> PayrollResult<EmployeeView> {
        let employee = self.require_employee(id)?;
        let department = self.store.departments().find_by_id(employee.doc.department)?;
        Ok(employee_view(employee, department))
    }

    pub fn create_employee(
        &self,
        principal: &Principal,
        employee: Employee,
    ) -> PayrollResult<EmployeeView> {
        let department = self.require_department(employee.department)?;
        let stored = self.store.employees().insert(employee)?;
        info!(
            actor = %principal.email,
            id = %stored.id,
            number = %stored.doc.employee_number,
            "employee created"
        );
        Ok(employee_view(stored, Some(department)))
    }

    pub fn update_employee(
        &self,
        principal: &Principal,
        id: Id,
        patch: &EmployeePatch,
    ) -> PayrollResult<EmployeeView> {
        if let Some(department) = patch.department {
            self.require_department(department)?;
        }
        let stored = self.store.employees().update(id, patch)?;
        info!(actor = %principal.email, %id, "employee updated");
        let department = self.store.departments().find_by_id(stored.doc.department)?;
        Ok(employee_view(stored, department))
    }

    pub fn delete_employee(&self, principal: &Principal, id: Id) -> PayrollResult<()> {
        self.require_employee(id)?;
        let records = self.store.salaries().count(&SalaryFilter {
            employee: Some(id),
            ..Default::default()
        })?;
        if records > 0 {
            return Err(PayrollError::ReferentialConflict(format!(
                "employee '{id}' still has {records} salary record(s)"
            )));
        }
        self.store.employees().delete(id)?;
        info!(actor = %principal.email, %id, "employee deleted");
        Ok(())
    }

    // ── Salaries ────────────────────────────────────────────────────

    pub fn list_salaries(&self, _principal: &Principal) -> PayrollResult<Vec<SalaryView>> {
        let salaries = self.store.salaries().find_many(&SalaryFilter::default())?;
        self.salary_views(salaries)
    }

    pub fn list_salaries_by_employee(
        &self,
        _principal: &Principal,
        employee: Id,
    ) -> PayrollResult<Vec<SalaryView>> {
        let salaries = self.store.salaries().find_many(&SalaryFilter {
            employee: Some(employee),
            ..Default::default()
        })?;
        self.salary_views(salaries)
    }

    pub fn get_salary(&self, _principal: &Principal, id: Id) -> PayrollResult<SalaryView> {
        let salary = self.require_salary(id)?;
        self.salary_view(salary)
    }

    /// Record the salary of one employee for one period.  The net salary
    /// is derived from gross and deduction; any client value is ignored.
    pub fn create_salary(&self, principal: &Principal, new: NewSalary) -> PayrollResult<SalaryView> {
        let period = resolve_period(&new.month, new.year)?;
        let employee = self.require_employee(new.employee)?;
        let gross_salary = match new.gross_salary {
            Some(gross) => gross,
            None => self
                .store
                .departments()
                .find_by_id(employee.doc.department)?
                .map(|d| d.doc.base_gross_salary)
                .ok_or_else(|| {
                    PayrollError::ValidationFailed(
                        "grossSalary is required when the employee has no department".into(),
                    )
                })?,
        };
        if new.net_salary.is_some() {
            debug!("ignoring client supplied netSalary");
        }

        let salary = Salary {
            employee: employee.id,
            gross_salary,
            total_deduction: new.total_deduction,
            net_salary: 0.0,
            month: period.month,
            year: period.year,
            status: PaymentStatus::Pending,
            payment_date: None,
        };
        let stored = self.store.salaries().insert(salary)?;
        info!(
            actor = %principal.email,
            id = %stored.id,
            employee = %employee.id,
            %period,
            net = stored.doc.net_salary,
            "salary recorded"
        );
        self.salary_view(stored)
    }

    pub fn update_salary(
        &self,
        principal: &Principal,
        id: Id,
        update: SalaryUpdate,
    ) -> PayrollResult<SalaryView> {
        let current = self.require_salary(id)?;
        if let Some(employee) = update.employee {
            self.require_employee(employee)?;
        }

        let mut patch = SalaryPatch {
            employee: update.employee,
            gross_salary: update.gross_salary,
            total_deduction: update.total_deduction,
            year: update.year,
            status: update.status,
            ..Default::default()
        };
        if let Some(month) = &update.month {
            let year = if month.contains('-') {
                update.year
            } else {
                update.year.or(Some(current.doc.year))
            };
            let period = resolve_period(month, year)?;
            patch.month = Some(period.month);
            patch.year = Some(period.year);
        }
        if update.status == Some(PaymentStatus::Paid) && current.doc.status != PaymentStatus::Paid {
            patch.payment_date = Some(Utc::now());
        }

        let stored = self.store.salaries().update(id, &patch)?;
        info!(actor = %principal.email, %id, net = stored.doc.net_salary, "salary updated");
        self.salary_view(stored)
    }

    pub fn delete_salary(&self, principal: &Principal, id: Id) -> PayrollResult<()> {
        self.store.salaries().delete(id)?;
        info!(actor = %principal.email, %id, "salary deleted");
        Ok(())
    }

    // ── Payroll ─────────────────────────────────────────────────────

    /// Summary of the `YYYY-MM` period.  Read only.
    pub fn summarize(&self, _principal: &Principal, period: &str) -> PayrollResult<PayrollSummary> {
        let period = parse_period(period)?;
        let total_employees = self.store.employees().count(&EmployeeFilter::default())?;
        let salaries = self.store.salaries().find_many(&SalaryFilter::for_period(period))?;

        let total_salary = salaries.iter().map(|s| s.doc.net_salary).sum();
        let paid_payments = salaries
            .iter()
            .filter(|s| s.doc.status == PaymentStatus::Paid)
            .count();
        let pending_payments = salaries
            .iter()
            .filter(|s| s.doc.status == PaymentStatus::Pending)
            .count();

        let mut recent = salaries;
        recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        recent.truncate(RECENT_PAYMENTS_LIMIT);
        let recent_payments = recent
            .into_iter()
            .map(|s| {
                let employee_name = self
                    .store
                    .employees()
                    .find_by_id(s.doc.employee)?
                    .map(|e| e.doc.full_name())
                    .unwrap_or_else(|| UNKNOWN_EMPLOYEE.to_string());
                Ok(RecentPayment {
                    id: s.id,
                    employee_name,
                    amount: s.doc.net_salary,
                    payment_date: s.updated_at,
                    status: s.doc.status,
                })
            })
            .collect::<PayrollResult<Vec<_>>>()?;

        debug!(%period, records = paid_payments + pending_payments, "payroll summarized");
        Ok(PayrollSummary {
            total_employees,
            total_salary,
            paid_payments,
            pending_payments,
            recent_payments,
        })
    }

    /// Mark every pending salary of the `YYYY-MM` period as paid, all
    /// with the same payment date.  The batch is all-or-nothing.
    /// Records that are already paid keep their original payment date.
    pub fn process_payroll(&self, principal: &Principal, period: &str) -> PayrollResult<ProcessOutcome> {
        let period = parse_period(period)?;
        let now = Utc::now();

        let already_paid = self.store.salaries().count(&SalaryFilter {
            status: Some(PaymentStatus::Paid),
            ..SalaryFilter::for_period(period)
        })?;
        let patch = SalaryPatch {
            status: Some(PaymentStatus::Paid),
            payment_date: Some(now),
            ..Default::default()
        };
        let processed = self.store.salaries().update_many(
            &SalaryFilter {
                status: Some(PaymentStatus::Pending),
                ..SalaryFilter::for_period(period)
            },
            &patch,
        )?;

        info!(
            actor = %principal.email,
            %period,
            processed = processed.len(),
            already_paid,
            "payroll processed"
        );
        Ok(ProcessOutcome {
            period,
            processed: processed.len(),
            already_paid,
            payment_date: now,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn require_department(&self, id: Id) -> PayrollResult<Stored<Department>> {
        self.store
            .departments()
            .find_by_id(id)?
            .ok_or_else(|| PayrollError::NotFound(format!("department '{id}' not found")))
    }

    fn require_employee(&self, id: Id) -> PayrollResult<Stored<Employee>> {
        self.store
            .employees()
            .find_by_id(id)?
            .ok_or_else(|| PayrollError::NotFound(format!("employee '{id}' not found")))
    }

    fn require_salary(&self, id: Id) -> PayrollResult<Stored<Salary>> {
        self.store
            .salaries()
            .find_by_id(id)?
            .ok_or_else(|| PayrollError::NotFound(format!("salary record '{id}' not found")))
    }

    fn with_headcount(&self, department: Stored<Department>) -> PayrollResult<DepartmentView> {
        let count = self.store.employees().count(&EmployeeFilter {
            department: Some(department.id),
        })?;
        Ok(department_view(department, count))
    }

    fn department_index(&self) -> PayrollResult<HashMap<Id, Stored<Department>>> {
        Ok(self
            .store
            .departments()
            .find_many(&DepartmentFilter::default())?
            .into_iter()
            .map(|d| (d.id, d))
            .collect())
    }

    fn salary_view(&self, salary: Stored<Salary>) -> PayrollResult<SalaryView> {
        let employee = self.store.employees().find_by_id(salary.doc.employee)?;
        let department = match &employee {
            Some(e) => self.store.departments().find_by_id(e.doc.department)?,
            None => None,
        };
        Ok(SalaryView {
            salary,
            employee_details: employee,
            department_details: department,
        })
    }

    fn salary_views(&self, salaries: Vec<Stored<Salary>>) -> PayrollResult<Vec<SalaryView>> {
        let departments = self.department_index()?;
        let employees: HashMap<Id, Stored<Employee>> = self
            .store
            .employees()
            .find_many(&EmployeeFilter::default())?
            .into_iter()
            .map(|e| (e.id, e))
            .collect();
        Ok(salaries
            .into_iter()
            .map(|salary| {
                let employee = employees.get(&salary.doc.employee).cloned();
                let department = employee
                    .as_ref()
                    .and_then(|e| departments.get(&e.doc.department).cloned());
                SalaryView {
                    salary,
                    employee_details: employee,
                    department_details: department,
                }
            })
            .collect())
    }
}

fn department_view(department: Stored<Department>, employee_count: usize) -> DepartmentView {
    let total_department_salary = employee_count as f64 * department.doc.base_gross_salary;
    DepartmentView {
        department,
        employee_count,
        total_department_salary,
    }
}

fn employee_view(employee: Stored<Employee>, department: Option<Stored<Department>>) -> EmployeeView {
    let full_name = employee.doc.full_name();
    EmployeeView {
        employee,
        full_name,
        department_details: department,
    }
}

/// Period of a salary input: either `YYYY-MM`, or a month name plus year.
fn resolve_period(month: &str, year: Option<i32>) -> PayrollResult<Period> {
    if month.contains('-') {
        let period = parse_period(month)?;
        return match year {
            Some(y) if y != period.year => Err(PayrollError::ValidationFailed(format!(
                "year {y} does not match month '{month}'"
            ))),
            _ => Ok(period),
        };
    }
    let month: Month = month.parse()?;
    let year = year.ok_or_else(|| {
        PayrollError::ValidationFailed("year is required when month is given by name".into())
    })?;
    Ok(Period { month, year })
}
