pub mod control;
pub mod scheduling;
