//! Wire types shared by every foreman crate: opaque ids, the Job/Run data
//! model, and the closed event-tag vocabulary. No I/O lives here.

pub mod event;
pub mod ids;
pub mod job;
pub mod run;

pub use event::{Event, EventKind, InterruptReason, Phase, ServerRole, ToolStatus};
pub use ids::{JobId, RunId};
pub use job::{Job, JobStatus};
pub use run::{Run, TerminalEventType};
