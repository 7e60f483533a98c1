pub mod cache;
pub mod ebird;
pub mod fetch;
pub mod queue;
pub mod rank_calculator;
pub mod ranking;
pub mod report;
pub mod session;
pub mod species;
pub mod taxonomy;
pub mod worker;
