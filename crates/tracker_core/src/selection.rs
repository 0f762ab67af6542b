use std::fmt;

use crate::{Datapoint, DatapointId, Status};

/// Which datapoints a scrape cycle works on. `MANUAL` datapoints never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// On-demand re-extraction of a single datapoint.
    One(DatapointId),
    /// Everything in AUTO, VERIFY or FIX.
    Schedulable,
    /// Periodic runner: AUTO only.
    AutoOnly,
    /// AUTO datapoints of one data group.
    Group(String),
}

impl Selection {
    pub fn matches(&self, datapoint: &Datapoint) -> bool {
        match self {
            Selection::One(id) => datapoint.id == *id && datapoint.is_schedulable(),
            Selection::Schedulable => datapoint.is_schedulable(),
            Selection::AutoOnly => datapoint.status == Status::Auto,
            Selection::Group(name) => {
                datapoint.status == Status::Auto && datapoint.group.as_deref() == Some(name.as_str())
            }
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::One(id) => write!(f, "datapoint {id}"),
            Selection::Schedulable => write!(f, "all AUTO, VERIFY and FIX datapoints"),
            Selection::AutoOnly => write!(f, "all AUTO datapoints"),
            Selection::Group(name) => write!(f, "AUTO datapoints in group '{name}'"),
        }
    }
}

/// Filters `datapoints` down to the working set, keeping their order.
pub fn select<'a, I>(datapoints: I, selection: &Selection) -> Vec<Datapoint>
where
    I: IntoIterator<Item = &'a Datapoint>,
{
    datapoints
        .into_iter()
        .filter(|datapoint| selection.matches(datapoint))
        .cloned()
        .collect()
}
