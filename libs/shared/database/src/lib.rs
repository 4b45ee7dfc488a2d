pub mod rest;

pub use rest::{ApiError, RestClient};
