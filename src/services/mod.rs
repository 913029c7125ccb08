pub mod billing;
pub mod fees;
pub mod monitor;
pub mod notifier;
pub mod payments;
pub mod rates;
