pub mod metrics;
pub use metrics::*;

pub mod sprt;
pub use sprt::*;

pub mod tracker;
pub use tracker::*;
