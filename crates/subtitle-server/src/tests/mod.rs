//! Scenario tests for the subtitle server.
//!
//! - `harness.rs`    - router fixture and recording client
//! - `sessions.rs`   - session lifecycle and error cases
//! - `open_race.rs`  - opens arriving inside the race window
//! - `callbacks.rs`  - slot reuse, death notification, fallback routing
//! - `ordering.rs`   - FIFO delivery across sessions and producers
//! - `end_to_end.rs` - socket and FMQ producers through to clients

mod end_to_end;
mod sessions;
