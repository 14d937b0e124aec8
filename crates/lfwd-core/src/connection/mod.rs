//! Connection management helpers shared by both session sides.
//!
//! - `ChannelMap`: channel container with side-aware ID allocation

mod channel_map;

pub use channel_map::ChannelMap;
