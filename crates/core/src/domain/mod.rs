pub mod actor;
pub mod booking;
pub mod device;
pub mod pricing_rule;
