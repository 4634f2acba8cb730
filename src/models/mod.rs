pub mod config;
pub mod event;
pub mod filter;
pub mod packet;
pub mod stats;
pub mod version;
