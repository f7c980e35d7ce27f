pub mod chat;
pub mod cli;
pub mod config;
pub mod context;
pub mod models;
pub mod session;
pub mod storage;
pub mod stream;
