pub mod ai;
pub mod bridge;
pub mod worker;
