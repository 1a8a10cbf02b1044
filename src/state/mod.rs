pub mod activity;
pub mod cache;
pub mod config;
pub mod integrity;
pub mod journal;
pub mod knowledge;
pub mod ledger;
pub mod lock;
pub mod path_guard;
pub mod paths;
pub mod phases;
pub mod session;
pub mod util;
pub mod warn;
pub mod worker;
