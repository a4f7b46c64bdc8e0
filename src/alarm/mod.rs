pub mod calculator;
pub mod lifecycle;
pub mod model;
pub mod persistence;
pub mod scheduler;
pub mod tone;
