//! Payroll Engine library crate.
//!
//! This crate exposes the payroll record keeping service (departments,
//! employees, monthly salary records, payroll summaries and processing)
//! and its HTTP API as reusable modules.  External applications may
//! depend on the `payroll_engine` crate and drive
//! `engine::PayrollEngine` over any `store::Store` directly, or embed
//! the API via `api::build_router`.

pub mod models;
pub mod error;
pub mod validation;
pub mod store;
pub mod auth;
pub mod engine;
pub mod config;
pub mod api;
