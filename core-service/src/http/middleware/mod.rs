mod priority;

pub use priority::{RequestPriorityLayer, RequestPriorityService, SLOW_REQUEST_THRESHOLD};
