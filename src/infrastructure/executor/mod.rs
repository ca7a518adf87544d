//! Priority-ordered job execution.

mod priority_executor;

pub use priority_executor::{
    DEFAULT_THREAD_COUNT, ExecutorOwnership, PrioritizedJob, PriorityExecutor, thread_count_for,
};
