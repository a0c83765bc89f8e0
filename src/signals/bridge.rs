// =============================================================================
// Signal bridge — cross-symbol suppression table
// =============================================================================
//
// One central block-until table, keyed by symbol hash, owned by this
// component and read by every lane. When a leader fires, every other
// registered symbol is blocked for the follower-block window; follower
// signals can likewise block the leader. Block extensions are max-merged so
// a later, shorter block never shortens an earlier one.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Default)]
pub struct SignalBridge {
    /// symbol hash → blocked-until timestamp (engine ns).
    blocks: RwLock<HashMap<u32, u64>>,
}

impl SignalBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a symbol known to the bridge. Unregistered symbols cannot be
    /// bulk-blocked by `block_others`.
    pub fn register(&self, symbol_hash: u32) {
        self.blocks.write().entry(symbol_hash).or_insert(0);
    }

    /// Block a single symbol until `until_ns`. Extensions only.
    pub fn block(&self, symbol_hash: u32, until_ns: u64) {
        let mut blocks = self.blocks.write();
        let entry = blocks.entry(symbol_hash).or_insert(0);
        if until_ns > *entry {
            *entry = until_ns;
        }
    }

    /// Block every registered symbol except `leader_hash`. Called by the
    /// arbiter when the leader fires.
    pub fn block_others(&self, leader_hash: u32, until_ns: u64) {
        let mut blocks = self.blocks.write();
        for (hash, entry) in blocks.iter_mut() {
            if *hash != leader_hash && until_ns > *entry {
                *entry = until_ns;
            }
        }
    }

    pub fn blocked(&self, symbol_hash: u32, now_ns: u64) -> bool {
        self.blocks
            .read()
            .get(&symbol_hash)
            .is_some_and(|until| now_ns < *until)
    }

    pub fn block_remaining_ns(&self, symbol_hash: u32, now_ns: u64) -> u64 {
        self.blocks
            .read()
            .get(&symbol_hash)
            .map_or(0, |until| until.saturating_sub(now_ns))
    }

    pub fn clear(&self) {
        for entry in self.blocks.write().values_mut() {
            *entry = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_expires_with_time() {
        let bridge = SignalBridge::new();
        bridge.block(1, 1_000);
        assert!(bridge.blocked(1, 500));
        assert!(!bridge.blocked(1, 1_000));
        assert_eq!(bridge.block_remaining_ns(1, 400), 600);
    }

    #[test]
    fn shorter_block_never_shrinks_longer_one() {
        let bridge = SignalBridge::new();
        bridge.block(1, 2_000);
        bridge.block(1, 1_000);
        assert!(bridge.blocked(1, 1_500));
    }

    #[test]
    fn leader_fire_blocks_followers_only() {
        let bridge = SignalBridge::new();
        bridge.register(1);
        bridge.register(2);
        bridge.register(3);

        bridge.block_others(1, 5_000);
        assert!(!bridge.blocked(1, 100));
        assert!(bridge.blocked(2, 100));
        assert!(bridge.blocked(3, 100));
    }

    #[test]
    fn unregistered_symbol_is_never_blocked() {
        let bridge = SignalBridge::new();
        bridge.register(1);
        bridge.block_others(1, 5_000);
        assert!(!bridge.blocked(99, 100));
    }
}
