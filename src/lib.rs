pub mod app;
pub mod attachments;
pub mod chat;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod encode;
pub mod error;
pub mod handlers;
pub mod resolver;
pub mod upstream;
