//! Shared data types for the huddle chat service: persisted-model views,
//! REST DTOs and the WebSocket envelope protocol.

pub mod api;
pub mod events;
pub mod models;
