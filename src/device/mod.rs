pub mod connection;
pub mod constants;
pub mod dispatch;
pub mod subscriber;
pub mod types;
