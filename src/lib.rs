pub mod audit;
pub mod authz;
pub mod cli;
pub mod client;
pub mod config;
pub mod controller;
pub mod cpu;
pub mod daemon;
pub mod identity;
pub mod model;
pub mod paths;
pub mod pid;
pub mod pool;
pub mod process;
pub mod protocol;
pub mod store;
pub mod sys;
pub mod verify;
