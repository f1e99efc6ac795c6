//! Finite-field Diffie-Hellman.
//!
//! Parameters are demo-scale: `p` is drawn from [`PRIME_RANGE`] and checked
//! by trial division, so every value fits comfortably in a `u64` and the
//! exchange can be followed by hand in a packet capture.

use std::fmt;
use std::ops::Range;

use rand::{rngs::OsRng, Rng};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Range generated moduli are drawn from.
pub const PRIME_RANGE: Range<u64> = 2_000..10_000;

/// Smallest modulus with a non-empty private exponent range `[2, p-2]`.
pub const MIN_MODULUS: u64 = 5;

/// Key agreement errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyAgreementError {
    #[error("modulus too small: {0} < {MIN_MODULUS}")]
    ParameterTooSmall(u64),

    #[error("generator {g} outside [2, p-2] for p={p}")]
    InvalidGenerator { p: u64, g: u64 },

    #[error("public value {value} outside [1, p-1] for p={p}")]
    InvalidPublicValue { p: u64, value: u64 },

    #[error("private exponent outside [2, p-2] for p={0}")]
    InvalidPrivateExponent(u64),
}

impl From<KeyAgreementError> for keyline_common::Error {
    fn from(err: KeyAgreementError) -> Self {
        Self::KeyAgreement(err.to_string())
    }
}

/// Domain parameters `(p, g)` for one handshake attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhParams {
    p: u64,
    g: u64,
}

impl DhParams {
    /// Validate supplied parameters.
    ///
    /// `p` is not re-checked for primality; callers that accept a peer's
    /// modulus get exactly the group the peer asked for.
    pub fn new(p: u64, g: u64) -> Result<Self, KeyAgreementError> {
        if p < MIN_MODULUS {
            return Err(KeyAgreementError::ParameterTooSmall(p));
        }
        if g < 2 || g > p - 2 {
            return Err(KeyAgreementError::InvalidGenerator { p, g });
        }
        Ok(Self { p, g })
    }

    /// Fresh random parameters.
    pub fn generate() -> Self {
        let (p, g) = choose_parameters();
        Self { p, g }
    }

    /// Use whichever of `p` and `g` were supplied and generate the rest.
    ///
    /// A missing generator is drawn for the supplied modulus, so a bare
    /// `p` always yields a valid pair.
    pub fn resolve(p: Option<u64>, g: Option<u64>) -> Result<Self, KeyAgreementError> {
        match (p, g) {
            (Some(p), Some(g)) => Self::new(p, g),
            (Some(p), None) => {
                if p < MIN_MODULUS {
                    return Err(KeyAgreementError::ParameterTooSmall(p));
                }
                Self::new(p, random_generator(p))
            }
            (None, Some(g)) => Self::new(random_prime(), g),
            (None, None) => Ok(Self::generate()),
        }
    }

    pub fn p(&self) -> u64 {
        self.p
    }

    pub fn g(&self) -> u64 {
        self.g
    }

    /// Check that a peer's public value is a non-zero residue mod `p`.
    pub fn check_public(&self, value: u64) -> Result<(), KeyAgreementError> {
        if value == 0 || value >= self.p {
            return Err(KeyAgreementError::InvalidPublicValue { p: self.p, value });
        }
        Ok(())
    }
}

impl fmt::Display for DhParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p={} g={}", self.p, self.g)
    }
}

/// Secret exponent, zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PrivateExponent(u64);

impl PrivateExponent {
    /// Wrap a known exponent, checking it lies in `[2, p-2]`.
    pub fn new(value: u64, p: u64) -> Result<Self, KeyAgreementError> {
        if p < MIN_MODULUS {
            return Err(KeyAgreementError::ParameterTooSmall(p));
        }
        if value < 2 || value > p - 2 {
            return Err(KeyAgreementError::InvalidPrivateExponent(p));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PrivateExponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateExponent(..)")
    }
}

/// Agreed secret `peer_public^own_private mod p`, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(u64);

impl SharedSecret {
    pub fn expose(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// One party's ephemeral key pair.
#[derive(Debug)]
pub struct KeyPair {
    private: PrivateExponent,
    public: u64,
}

impl KeyPair {
    /// Generate a fresh exponent for `params` and its public value.
    pub fn generate(params: &DhParams) -> Result<Self, KeyAgreementError> {
        let private = generate_private(params.p)?;
        let public = public_value(params.g, &private, params.p);
        Ok(Self { private, public })
    }

    pub fn public(&self) -> u64 {
        self.public
    }

    /// Combine with the peer's public value.
    pub fn agree(&self, peer_public: u64, params: &DhParams) -> SharedSecret {
        shared_secret(peer_public, &self.private, params.p)
    }
}

/// Sample a demo-scale prime `p` and a generator in `[2, p-2]`.
pub fn choose_parameters() -> (u64, u64) {
    let p = random_prime();
    (p, random_generator(p))
}

/// Uniform private exponent in `[2, p-2]` from the OS CSPRNG.
pub fn generate_private(p: u64) -> Result<PrivateExponent, KeyAgreementError> {
    if p < MIN_MODULUS {
        return Err(KeyAgreementError::ParameterTooSmall(p));
    }
    Ok(PrivateExponent(OsRng.gen_range(2..=p - 2)))
}

/// `g^a mod p`.
pub fn public_value(g: u64, private: &PrivateExponent, p: u64) -> u64 {
    mod_pow(g, private.0, p)
}

/// `peer_public^a mod p`.
pub fn shared_secret(peer_public: u64, private: &PrivateExponent, p: u64) -> SharedSecret {
    SharedSecret(mod_pow(peer_public, private.0, p))
}

/// Square-and-multiply with 128-bit intermediates.
pub fn mod_pow(base: u64, mut exp: u64, modulus: u64) -> u64 {
    if modulus == 1 {
        return 0;
    }
    let m = modulus as u128;
    let mut base = base as u128 % m;
    let mut result: u128 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result * base % m;
        }
        base = base * base % m;
        exp >>= 1;
    }
    result as u64
}

/// Trial-division primality test.
pub fn is_prime(n: u64) -> bool {
    if n <= 1 {
        return false;
    }
    if n <= 3 {
        return true;
    }
    if n % 2 == 0 {
        return false;
    }
    let mut i = 3u64;
    while i.saturating_mul(i) <= n {
        if n % i == 0 {
            return false;
        }
        i += 2;
    }
    true
}

fn random_prime() -> u64 {
    let Range { start, end } = PRIME_RANGE;
    loop {
        let mut n = OsRng.gen_range(start..end);
        if n % 2 == 0 {
            n += 1;
        }
        if n >= end {
            n = if (end - 1) % 2 == 1 { end - 1 } else { end - 2 };
        }
        if is_prime(n) {
            return n;
        }
    }
}

fn random_generator(p: u64) -> u64 {
    OsRng.gen_range(2..=p - 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_prime_small_values() {
        let primes = [2, 3, 5, 7, 11, 13, 7919, 9973];
        let composites = [0, 1, 4, 9, 15, 7917, 9999, 2001];
        for p in primes {
            assert!(is_prime(p), "{p} should be prime");
        }
        for c in composites {
            assert!(!is_prime(c), "{c} should be composite");
        }
    }

    #[test]
    fn test_choose_parameters_in_range() {
        for _ in 0..200 {
            let (p, g) = choose_parameters();
            assert!(PRIME_RANGE.contains(&p));
            assert!(is_prime(p));
            assert!((2..=p - 2).contains(&g));
        }
    }

    #[test]
    fn test_mod_pow_known_values() {
        assert_eq!(mod_pow(5, 6, 23), 8);
        assert_eq!(mod_pow(5, 15, 23), 19);
        assert_eq!(mod_pow(2, 0, 7), 1);
        assert_eq!(mod_pow(10, 3, 1), 0);
    }

    #[test]
    fn test_mod_pow_does_not_overflow() {
        let p = u64::MAX - 58; // largest 64-bit prime
        let r = mod_pow(p - 1, 2, p);
        assert_eq!(r, 1);
    }

    #[test]
    fn test_generate_private_rejects_small_modulus() {
        for p in 0..MIN_MODULUS {
            assert_eq!(
                generate_private(p).unwrap_err(),
                KeyAgreementError::ParameterTooSmall(p)
            );
        }
    }

    #[test]
    fn test_generate_private_in_range() {
        // p = 5 leaves exactly [2, 3]
        for _ in 0..100 {
            let a = generate_private(5).unwrap();
            assert!((2..=3).contains(&a.expose()));
        }
    }

    #[test]
    fn test_textbook_exchange() {
        let params = DhParams::new(23, 5).unwrap();
        let a = PrivateExponent::new(6, 23).unwrap();
        let b = PrivateExponent::new(15, 23).unwrap();
        let big_a = public_value(params.g(), &a, params.p());
        let big_b = public_value(params.g(), &b, params.p());
        assert_eq!(big_a, 8);
        assert_eq!(big_b, 19);
        assert_eq!(shared_secret(big_b, &a, 23).expose(), 2);
        assert_eq!(shared_secret(big_a, &b, 23).expose(), 2);
    }

    #[test]
    fn test_dh_agreement_random() {
        for _ in 0..100 {
            let params = DhParams::generate();
            let alice = KeyPair::generate(&params).unwrap();
            let bob = KeyPair::generate(&params).unwrap();
            assert_eq!(
                alice.agree(bob.public(), &params),
                bob.agree(alice.public(), &params)
            );
        }
    }

    #[test]
    fn test_params_validation() {
        assert!(DhParams::new(23, 5).is_ok());
        assert_eq!(
            DhParams::new(3, 2).unwrap_err(),
            KeyAgreementError::ParameterTooSmall(3)
        );
        assert!(matches!(
            DhParams::new(23, 1),
            Err(KeyAgreementError::InvalidGenerator { .. })
        ));
        assert!(matches!(
            DhParams::new(23, 22),
            Err(KeyAgreementError::InvalidGenerator { .. })
        ));
    }

    #[test]
    fn test_resolve_fills_missing_values() {
        let both = DhParams::resolve(Some(7919), Some(7)).unwrap();
        assert_eq!((both.p(), both.g()), (7919, 7));

        let only_p = DhParams::resolve(Some(7919), None).unwrap();
        assert_eq!(only_p.p(), 7919);
        assert!((2..=7917).contains(&only_p.g()));

        let only_g = DhParams::resolve(None, Some(3)).unwrap();
        assert!(PRIME_RANGE.contains(&only_g.p()));
        assert_eq!(only_g.g(), 3);

        let neither = DhParams::resolve(None, None).unwrap();
        assert!(is_prime(neither.p()));
    }

    #[test]
    fn test_resolve_rejects_generator_beyond_generated_modulus() {
        let result = DhParams::resolve(None, Some(50_000));
        assert!(matches!(result, Err(KeyAgreementError::InvalidGenerator { .. })));
    }

    #[test]
    fn test_check_public() {
        let params = DhParams::new(23, 5).unwrap();
        assert!(params.check_public(1).is_ok());
        assert!(params.check_public(22).is_ok());
        assert!(params.check_public(0).is_err());
        assert!(params.check_public(23).is_err());
    }

    #[test]
    fn test_private_exponent_debug_is_redacted() {
        let a = PrivateExponent::new(6, 23).unwrap();
        assert_eq!(format!("{a:?}"), "PrivateExponent(..)");
    }
}
