pub mod agent;
pub mod audit;
pub mod cluster;
pub mod errors;
pub mod models;
pub mod prompt_template;
pub mod providers;
pub mod tools;
