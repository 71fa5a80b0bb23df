pub mod processors;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod types;

#[cfg(test)]
mod tests;

// 重导出主要类型
pub use types::{CleanupStats, Task, TaskStats, TaskUpdate};

pub use registry::{Subscription, TaskRegistry};
pub use reporter::{ProgressSink, RegistryReporter};

pub use processors::{JobPipeline, MediaPipeline};

pub use scheduler::TaskScheduler;
