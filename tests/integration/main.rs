//! Integration tests
//!
//! Scripted connectors drive the connection manager and protocol handler
//! under paused time; the WebSocket tests talk to a real local server.

mod connection_tests;
mod protocol_tests;
mod websocket_tests;
