pub mod connections;
pub mod filters;
pub mod listener;
pub mod packets;
