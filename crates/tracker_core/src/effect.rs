use crate::{Datapoint, DatapointId, Selection, Status};

/// Work the caller should schedule in response to a domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    EnqueueScrape { id: DatapointId },
    EnqueueBatch { selection: Selection },
}

/// Creation hook: a new `AUTO` datapoint gets one scrape enqueued.
pub fn on_created(datapoint: &Datapoint) -> Option<Effect> {
    (datapoint.status == Status::Auto).then_some(Effect::EnqueueScrape { id: datapoint.id })
}
