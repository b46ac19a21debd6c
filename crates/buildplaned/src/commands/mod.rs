pub mod builds;
pub mod compare;
pub mod pipeline;
