// HTTP trigger surface
pub mod handler;
pub mod models;
