//! Inbound listener
//!
//! Accepts client connections and spawns one dispatch task per connection.

pub mod listener;
