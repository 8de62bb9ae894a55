pub mod frame_source;
pub mod region;
pub mod region_scorer;
pub mod tracker;
pub mod utils;
