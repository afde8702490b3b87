pub mod comparator;
pub mod engine;
pub mod reconciler;
pub mod scheduler;

pub use comparator::{
    CompareConfig, CompareStrategy, ContentHashStrategy, FileComparator, ModifiedTimeStrategy,
    SizeStrategy, StrategyKind,
};
pub use engine::{SyncEngine, SyncReport, SyncRunner, SyncStatus};
pub use reconciler::{ReconcileOptions, ReconcileStats, Reconciler};
pub use scheduler::{ScheduleSummary, SchedulerState, SyncScheduler};
