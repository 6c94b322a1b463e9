//! Pure aggregation over fetched pull requests. Nothing in here touches the
//! network; every function derives a fresh value from its inputs.

pub mod duration;
pub mod metrics;
pub mod pagination;

pub use duration::{format_duration, format_std_duration};
pub use metrics::{
    MetricsResult, OpenPullRequest, aggregate, average_close_time, longest_running_open,
};
pub use pagination::paginate;
