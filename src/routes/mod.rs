pub mod health;
pub mod jobs;
pub mod metrics;
pub mod ws;
