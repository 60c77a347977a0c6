//! Payout address resolution for refunds and settlement.

use std::collections::HashMap;

use auction_types::{Address, KeyHash, NetworkId};
use parking_lot::RwLock;

/// Maps an on-chain identity to an address that can receive funds.
pub trait PayoutResolver: Send + Sync {
    /// `None` when no payable address is known for `identity`.
    fn resolve(&self, identity: &KeyHash) -> Option<Address>;
}

/// Derives an enterprise address from the key hash.
#[derive(Debug, Clone, Copy)]
pub struct DerivedResolver {
    network: NetworkId,
}

impl DerivedResolver {
    pub fn new(network: NetworkId) -> Self {
        Self { network }
    }
}

impl PayoutResolver for DerivedResolver {
    fn resolve(&self, identity: &KeyHash) -> Option<Address> {
        Some(Address::key(self.network, *identity))
    }
}

/// Registry of known payout addresses.
#[derive(Debug, Default)]
pub struct AddressBook {
    entries: RwLock<HashMap<KeyHash, Address>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: KeyHash, address: Address) {
        self.entries.write().insert(identity, address);
    }

    pub fn remove(&self, identity: &KeyHash) -> Option<Address> {
        self.entries.write().remove(identity)
    }
}

impl PayoutResolver for AddressBook {
    fn resolve(&self, identity: &KeyHash) -> Option<Address> {
        self.entries.read().get(identity).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_resolver() {
        let key = KeyHash([3; 28]);
        let resolver = DerivedResolver::new(NetworkId::Mainnet);
        assert_eq!(
            resolver.resolve(&key),
            Some(Address::key(NetworkId::Mainnet, key))
        );
    }

    #[test]
    fn test_address_book_unknown_identity() {
        let book = AddressBook::new();
        let key = KeyHash([3; 28]);
        assert_eq!(book.resolve(&key), None);

        let addr = Address::key(NetworkId::Testnet, key);
        book.insert(key, addr);
        assert_eq!(book.resolve(&key), Some(addr));

        assert_eq!(book.remove(&key), Some(addr));
        assert_eq!(book.resolve(&key), None);
    }
}
