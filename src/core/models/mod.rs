pub mod budget;
pub mod ledger;
