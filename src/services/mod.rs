pub mod convert;
pub mod hub;
pub mod wake;
pub mod worker;
