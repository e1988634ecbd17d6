pub mod progress;
pub mod session;
pub mod srs;
pub mod stats;
