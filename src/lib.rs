pub mod agent;
pub mod capabilities;
pub mod errors;
pub mod formatter;
pub mod index;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod registry;
