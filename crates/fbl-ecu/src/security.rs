//! XOR seed/key collaborator
//!
//! The key is the seed XORed with the shared secret, repeated as needed.
//! Key strength is not a goal here; the exchange only has to be
//! reproducible by a tester holding the same secret.

use fbl_uds::SecurityProvider;
use rand::RngCore;

pub struct XorSecurity {
    secret: Vec<u8>,
}

impl XorSecurity {
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }
}

/// Key a tester must send for `seed`
pub fn compute_key(seed: &[u8], secret: &[u8]) -> Vec<u8> {
    seed.iter()
        .zip(secret.iter().cycle())
        .map(|(s, k)| s ^ k)
        .collect()
}

impl SecurityProvider for XorSecurity {
    fn random_bytes(&mut self, buf: &mut [u8]) {
        rand::thread_rng().fill_bytes(buf);
    }

    fn decrypt_and_compare(&self, key: &[u8], seed: &[u8]) -> bool {
        !self.secret.is_empty() && key == compute_key(seed, &self.secret).as_slice()
    }
}
