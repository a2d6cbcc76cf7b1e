pub mod change;
pub mod client;
pub mod conversation;
pub mod db;
pub mod entities;
pub mod error;
pub mod message;
pub mod preference;
pub mod presence;
pub mod push;
pub mod serialization;
pub mod session;
pub mod store;
pub mod types;

// 重新导出客户端入口
pub use client::{ChatClient, CollectionNames, EngineConfig, PushConfig};
