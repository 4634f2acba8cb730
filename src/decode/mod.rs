pub mod decoder;
pub mod registry;
