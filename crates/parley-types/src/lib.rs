pub mod api;
pub mod contact_code;
pub mod error;
pub mod events;
pub mod models;
