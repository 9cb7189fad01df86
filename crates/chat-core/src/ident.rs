//! Server-scoped identity generation.

use chat_protocol::Uuid;

/// Mints `Uuid`s sharing this server's generator id with a monotonically
/// increasing sequence starting at 1.
///
/// Replay and relay paths record externally supplied ids directly; `observe`
/// keeps the counter ahead of any such id minted by this generator so fresh
/// ids never collide with replayed ones.
#[derive(Debug)]
pub struct IdentityGen {
    generator: u32,
    next_sequence: u32,
}

impl IdentityGen {
    pub fn new(generator: u32) -> IdentityGen {
        IdentityGen {
            generator,
            next_sequence: 1,
        }
    }

    pub fn generator(&self) -> u32 {
        self.generator
    }

    /// Mint a fresh id.
    pub fn next(&mut self) -> Uuid {
        let id = Uuid::new(self.generator, self.next_sequence);
        self.next_sequence += 1;
        id
    }

    /// Advance past an externally supplied id if it came from this generator.
    pub fn observe(&mut self, id: Uuid) {
        if id.generator == self.generator && id.sequence >= self.next_sequence {
            self.next_sequence = id.sequence + 1;
        }
    }
}
