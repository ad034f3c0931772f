pub mod event;
pub mod geo_record;
pub mod job;
