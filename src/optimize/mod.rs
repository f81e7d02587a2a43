pub mod map;

pub use map::{MapEstimate, MapOptimizer, MapOptions};
