pub mod client;
pub mod config;
pub mod media;
pub mod protocol;
pub mod schedule;
pub mod utils;
pub mod web;

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use config::LOG_DIR;
use schedule::{TaskRegistry, TaskScheduler};

pub type SubmissionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Build identifier, filled in by build.rs.
pub const VERSION: &str = env!("GIT_HASH");

pub struct AppContext {
    pub scheduler: Arc<TaskScheduler>,
    pub registry: Arc<TaskRegistry>,
    pub limiter: Arc<SubmissionLimiter>,
}

impl AppContext {
    pub fn new(scheduler: Arc<TaskScheduler>, submissions_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(submissions_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            registry: scheduler.registry().clone(),
            scheduler,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }
}

pub fn init_env() {
    dotenv::dotenv().ok();

    // 确保日志目录存在
    std::fs::create_dir_all(LOG_DIR.as_str()).unwrap_or_else(|e| {
        eprintln!("Failed to create log directory: {}", e);
    });
}
