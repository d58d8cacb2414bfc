//! Matrix execution engine

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod fast_finish;
pub mod scheduler;

pub use cancel::{CancelSignal, RunCanceller};
pub use engine::{CancelReason, EventBus, ExecutionEngine, ExecutionEvent, RunReport};
pub use executor::{JobExecutor, StepsResult};
pub use fast_finish::FastFinishController;
pub use scheduler::{EnvironmentPool, SchedulingStrategy};
