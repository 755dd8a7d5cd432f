pub mod config;
pub mod health;
pub mod identity;
pub mod invites;
pub mod jobs;
pub mod operator;
pub mod trucks;
