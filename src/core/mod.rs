pub mod config;
pub mod formatter;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod pricing;
