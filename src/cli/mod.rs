pub mod config_cmd;
pub mod guard_cmd;
pub mod ledger_cmd;
pub mod output;
pub mod renderer;
