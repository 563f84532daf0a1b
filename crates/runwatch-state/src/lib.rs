pub mod buffer;
pub mod catalog;
pub mod reducer;
pub mod staleness;
pub mod store;
pub mod views;

pub use buffer::{AdmitReason, Admission, BufferedEvent, IngestionBuffer};
pub use reducer::{reduce, ChangeSet, RunViews};
pub use staleness::StalenessMonitor;
pub use store::{RunStore, StoreConfig, StoreSnapshot, ViewChange};
pub use views::{
    Agent, AgentStatus, DataSourceStat, Handover, RecoveryOption, RecoveryPlan, RunProgress,
    RunStatus,
};
