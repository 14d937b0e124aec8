//! Channel container for sessions.
//!
//! Provides a container for managing channels with ID allocation that
//! distinguishes between client and server initiated channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::protocol::{ChannelId, ChannelSide};

/// Channel container used by both session sides.
///
/// Type parameter `H` is the channel handle type. IDs allocated by this map
/// carry the side it was constructed for.
pub struct ChannelMap<H> {
    channels: RwLock<HashMap<ChannelId, H>>,
    next_id: AtomicU64,
    side: ChannelSide,
}

impl<H: Clone> ChannelMap<H> {
    /// Create a new channel map for the given side.
    pub fn new(side: ChannelSide) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            side,
        }
    }

    /// The side IDs are allocated for.
    pub fn side(&self) -> ChannelSide {
        self.side
    }

    /// Allocate a new channel ID.
    pub fn allocate_id(&self) -> ChannelId {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        match self.side {
            ChannelSide::Client => ChannelId::client(seq),
            ChannelSide::Server => ChannelId::server(seq),
        }
    }

    /// Insert a channel handle.
    pub async fn insert(&self, id: ChannelId, handle: H) {
        self.channels.write().await.insert(id, handle);
    }

    /// Remove a channel by ID.
    pub async fn remove(&self, id: &ChannelId) -> Option<H> {
        self.channels.write().await.remove(id)
    }

    /// Get a clone of a channel handle by ID.
    pub async fn get(&self, id: &ChannelId) -> Option<H> {
        self.channels.read().await.get(id).cloned()
    }

    /// Check if a channel exists.
    pub async fn contains(&self, id: &ChannelId) -> bool {
        self.channels.read().await.contains_key(id)
    }

    /// Get the number of channels.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Drain all channels, returning them as a vector.
    pub async fn drain(&self) -> Vec<(ChannelId, H)> {
        self.channels.write().await.drain().collect()
    }
}
