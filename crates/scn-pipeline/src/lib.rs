//! Job lifecycle: queueing, promotion, dispatch, run execution, and the
//! change-triggered artifact/webhook fan-out.

pub mod artifact;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod promoter;
pub mod queue;
pub mod run;
pub mod schedule;
pub mod webhook;

pub use artifact::generate_llms_txt;
pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use promoter::QueuePromoter;
pub use queue::{JobQueue, QueueError};
pub use run::{RunExecutor, RunOutcome};
pub use schedule::{next_due, ScheduleError, CRON_DAILY_2AM, CRON_WEEKLY_SUNDAY_2AM};
pub use webhook::WebhookNotifier;

pub const CRATE_NAME: &str = "scn-pipeline";
