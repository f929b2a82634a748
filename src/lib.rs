pub mod article;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod group;
pub mod leader;
pub mod message_broker;
pub mod rpc;
pub mod scheduler;
pub mod store;
pub mod tabs;
