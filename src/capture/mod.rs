pub mod codec;
pub mod connection;
pub mod filter;
pub mod listener;
pub mod relay;
pub mod session;
