//! End-to-end tests for contempt.
//!
//! These tests run the client against real sockets:
//! - A local WebSocket gateway speaking the JSON packet protocol
//! - A local REST server with scripted rate limits and failures
//! - The full connect, dispatch and cache path

#![cfg(test)]
