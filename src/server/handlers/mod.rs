pub mod drivers;
pub mod emergency;
pub mod quotes;
pub mod rides;
pub mod stats;
pub mod surge;
