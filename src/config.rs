//! Server configuration.
//!
//! Every setting can be given as a flag or through a `PAYROLL_*`
//! environment variable; flags win.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "payroll_engine", about = "Employee payroll management server")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(long, env = "PAYROLL_BIND_ADDR", default_value = "127.0.0.1:5000")]
    pub listen: String,

    /// JSON snapshot file.  Loaded at start and written on shutdown.
    /// Without it all records live in memory only.
    #[arg(long, env = "PAYROLL_DATA_FILE")]
    pub data_file: Option<PathBuf>,

    /// Session token registered at start for an administrator.
    #[arg(long, env = "PAYROLL_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Email of the administrator owning `admin_token`.
    #[arg(long, env = "PAYROLL_ADMIN_EMAIL", default_value = "admin@localhost")]
    pub admin_email: String,
}
