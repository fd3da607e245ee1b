//! Randomness for key generation, nonces and reuse guards, drawn from the operating system.

use rand_core::{CryptoRng, OsRng, RngCore};

#[inline]
pub fn get_rng() -> impl RngCore + CryptoRng {
    OsRng
}

#[inline]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    get_rng().fill_bytes(&mut bytes);
    bytes
}

#[inline]
pub fn random_bytes_vec(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    get_rng().fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuse_guards_differ() {
        let first = random_bytes::<4>();
        let second = random_bytes::<4>();
        let secret = random_bytes_vec(32);

        assert_eq!(secret.len(), 32);
        assert_ne!(secret, vec![0u8; 32], "OS randomness returned zeroes");
        // 2^-32 chance of a false failure
        assert_ne!(first, second, "two reuse guards should differ");
    }
}
