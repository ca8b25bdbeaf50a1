pub mod artifact;
pub mod error;
pub mod events;
pub mod request;
pub mod status;
