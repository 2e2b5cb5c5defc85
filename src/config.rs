use clap::Parser;
use std::path::PathBuf;

pub const DB_FILE_NAME: &str = "school.sqlite3";
pub const DEFAULT_PASSING_GRADE: f64 = 6.0;
pub const MAX_GRADE: f64 = 10.0;

#[derive(Debug, Parser, Clone)]
#[command(name = "schoold", version, about = "School management sidecar")]
pub struct Config {
    /// Workspace directory to open at start-up.
    #[arg(long, env = "SCHOOLD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    #[arg(long, env = "SCHOOLD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Code a user must present to self-register as a teacher.
    #[arg(long, env = "SCHOOLD_TEACHER_CODE")]
    pub teacher_code: Option<String>,

    /// Code a user must present to self-register as an admin.
    #[arg(long, env = "SCHOOLD_ADMIN_CODE")]
    pub admin_code: Option<String>,

    /// bcrypt work factor for stored passwords.
    #[arg(
        long,
        env = "SCHOOLD_BCRYPT_COST",
        default_value_t = bcrypt::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(4..=31)
    )]
    pub bcrypt_cost: u32,

    #[arg(long, env = "SCHOOLD_NO_CACHE", default_value_t = false)]
    pub no_cache: bool,
}
