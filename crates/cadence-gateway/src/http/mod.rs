pub mod broker;
pub mod health;
pub mod jobs;
pub mod status;
