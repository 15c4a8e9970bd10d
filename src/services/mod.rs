pub mod catalog;
pub mod classifier;
pub mod http;
pub mod links;
pub mod logo;
pub mod playlist;
pub mod prober;
pub mod schedule;
pub mod store;
pub mod updater;
