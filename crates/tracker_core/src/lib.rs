//! Tracker core: data model, pure status machine and batch planning.
mod batch;
mod datapoint;
mod effect;
mod reconcile;
mod report;
mod selection;
mod status;
mod task;

pub use batch::{build_batch, BatchPlan, KindWarning, SkipReason};
pub use datapoint::{Datapoint, DatapointId, ExtractionKind, ParseKindError, ValueKind};
pub use effect::{on_created, Effect};
pub use reconcile::{
    classify, reconcile, release_to_auto, set_manual, verify, ReconcileError, Reconciled,
    Transition,
};
pub use report::{
    CycleReport, DropReason, DroppedResult, EntityFailure, EntityOutcome, Notice, NoticeLevel,
};
pub use selection::{select, Selection};
pub use status::{ParseStatusError, Status};
pub use task::{ExtractionTask, ResultStatus, ScrapeResult, TaskKey};
