//! Task planning and execution.

mod parallel;
mod planner;
mod runner;

pub use parallel::{
    JobResult, ParallelExecutor, ProjectJob, apply_results, drain_in_pool, order_jobs, run_job,
    run_job_with,
};
pub use planner::{FILE_TASK_PRIORITY, TaskPlanner, UNIT_TASK_PRIORITY, task_targets};
pub use runner::{TaskContext, TaskRunner, report_failure};
