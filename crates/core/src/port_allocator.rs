use std::collections::BTreeSet;

use rand::Rng;

use crate::error::CoreError;

/// Upper bound on randomized sampling trials before falling back to a
/// sequential scan (§4.3).
const MAX_RANDOM_TRIALS: usize = 1000;

/// Chooses a free port in `[range_start, range_end]` given the set of ports
/// currently held by `pending`/`active` credentials.
///
/// Carries no state of its own: "holding" a port is derived entirely from
/// credential status (I2), so the allocator only ever needs to see a
/// snapshot of what's currently held. That snapshot must be taken, and the
/// chosen port inserted as a new credential, inside the same locked section
/// — see `CredentialService::create` — or two concurrent callers could both
/// observe the port as free.
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    range_start: u16,
    range_end: u16,
}

impl PortAllocator {
    pub fn new(range_start: u16, range_end: u16) -> Self {
        Self {
            range_start,
            range_end,
        }
    }

    pub fn range_size(&self) -> usize {
        (self.range_end as usize).saturating_sub(self.range_start as usize) + 1
    }

    pub fn is_allocated(&self, held: &BTreeSet<u16>, port: u16) -> bool {
        held.contains(&port)
    }

    /// Sample ports uniformly at random with a CSPRNG, up to
    /// `min(rangeSize, 1000)` trials, then fall back to a sequential scan.
    /// Fails `PoolExhausted` if every port in range is held.
    pub fn allocate(&self, held: &BTreeSet<u16>) -> Result<u16, CoreError> {
        let range_size = self.range_size();
        if held.len() >= range_size {
            return Err(CoreError::PoolExhausted);
        }

        let mut rng = rand::rng();
        let trials = range_size.min(MAX_RANDOM_TRIALS);
        for _ in 0..trials {
            let candidate = rng.random_range(self.range_start..=self.range_end);
            if !held.contains(&candidate) {
                return Ok(candidate);
            }
        }

        (self.range_start..=self.range_end)
            .find(|port| !held.contains(port))
            .ok_or(CoreError::PoolExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_within_range() {
        let allocator = PortAllocator::new(10000, 10010);
        let held = BTreeSet::new();
        let port = allocator.allocate(&held).unwrap();
        assert!((10000..=10010).contains(&port));
    }

    #[test]
    fn never_returns_a_held_port() {
        let allocator = PortAllocator::new(10000, 10002);
        let mut held = BTreeSet::new();
        held.insert(10000);
        held.insert(10001);
        let port = allocator.allocate(&held).unwrap();
        assert_eq!(port, 10002);
    }

    #[test]
    fn exhaustion_when_every_port_is_held() {
        let allocator = PortAllocator::new(10000, 10001);
        let mut held = BTreeSet::new();
        held.insert(10000);
        held.insert(10001);
        assert!(matches!(allocator.allocate(&held), Err(CoreError::PoolExhausted)));
    }
}
