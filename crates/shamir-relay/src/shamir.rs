//! The modular-exponentiation core of the Shamir 3-pass commutative
//! cipher: generating the server's lock keypair and applying/removing
//! its lock on a client-supplied key-encryption-key. The VRF keypair
//! this locks never passes through here — only the KEK.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use thiserror::Error;

/// The compiled-in default prime, identical to the one the WASM VRF
/// worker ships so a relay can be stood up with zero configuration
/// during development.
pub const DEFAULT_P_B64U: &str = "3N5w46AIGjGT2v5Vua_TMD5Ywfa9U2F7-WzW8SNDsIM";

const MIN_PRIME_BITS: u64 = 256;
const RANDOM_BYTES_OVERHEAD: usize = 64;
const REJECTION_SAMPLING_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Error)]
pub enum ShamirError {
    #[error("invalid base64url encoding")]
    InvalidEncoding,
    #[error("prime is only {bits} bits, need at least {min_bits}")]
    PrimeTooSmall { bits: u64, min_bits: u64 },
    #[error("no modular inverse exists for this exponent")]
    NoModularInverse,
    #[error("failed to source random bytes")]
    RandomGenerationFailed,
}

#[derive(Debug, Clone)]
pub struct ServerLockKeys {
    /// Encryption exponent — applies the server's lock.
    pub e_s: BigUint,
    /// Decryption exponent — removes the server's lock.
    pub d_s: BigUint,
}

/// One relay's configured group: a prime `p` and the derived bounds for
/// sampling exponents. Cheap to clone; held by `AppState` as the shared,
/// immutable parameter set every request operates against.
#[derive(Clone, Debug)]
pub struct ShamirGroup {
    p: BigUint,
    p_minus_1: BigUint,
    min_k: BigUint,
    max_k: BigUint,
}

impl ShamirGroup {
    pub fn from_b64u(p_b64u: &str) -> Result<Self, ShamirError> {
        let p = decode_biguint_b64u(p_b64u)?;
        Self::from_biguint(p)
    }

    pub fn default_prime() -> Self {
        Self::from_b64u(DEFAULT_P_B64U).expect("compiled-in default prime is well-formed")
    }

    fn from_biguint(p: BigUint) -> Result<Self, ShamirError> {
        let bits = p.bits();
        if bits < MIN_PRIME_BITS {
            return Err(ShamirError::PrimeTooSmall { bits, min_bits: MIN_PRIME_BITS });
        }
        let one = BigUint::one();
        let two = &one + &one;
        let p_minus_1 = &p - &one;
        let min_k = if bits >= 1024 { BigUint::from(1u128 << 64) } else { BigUint::from(1u64 << 32) };
        let max_k = &p - &two;
        Ok(Self { p, p_minus_1, min_k, max_k })
    }

    pub fn p_b64u(&self) -> String {
        encode_biguint_b64u(&self.p)
    }

    fn modexp(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        base.modpow(exponent, &self.p)
    }

    fn modinv(&self, a: &BigUint) -> Option<BigUint> {
        let a = BigInt::from_biguint(Sign::Plus, a.clone());
        let m = BigInt::from_biguint(Sign::Plus, self.p_minus_1.clone());
        let (gcd, x, _) = extended_gcd(a, m.clone());
        if gcd != BigInt::one() {
            return None;
        }
        let mut x_mod = x % &m;
        if x_mod.sign() == Sign::Minus {
            x_mod += &m;
        }
        x_mod.to_biguint()
    }

    fn random_k(&self) -> Result<BigUint, ShamirError> {
        let range = &self.max_k - &self.min_k;
        let bytes_needed = (range.bits() as usize).div_ceil(8) + RANDOM_BYTES_OVERHEAD;
        for _ in 0..REJECTION_SAMPLING_MAX_ATTEMPTS {
            let mut buf = vec![0u8; bytes_needed];
            getrandom::getrandom(&mut buf).map_err(|_| ShamirError::RandomGenerationFailed)?;
            let candidate = BigUint::from_bytes_be(&buf) % &range;
            let k = &self.min_k + candidate;
            if k.gcd(&self.p_minus_1) == BigUint::one() {
                return Ok(k);
            }
        }
        Err(ShamirError::RandomGenerationFailed)
    }

    /// `generateServerKeypair()` — a fresh (e_s, d_s) with e_s * d_s ≡ 1
    /// (mod p-1), persisted by the operator and reused across requests
    /// until rotated.
    pub fn generate_keypair(&self) -> Result<ServerLockKeys, ShamirError> {
        let e_s = self.random_k()?;
        let d_s = self.modinv(&e_s).ok_or(ShamirError::NoModularInverse)?;
        Ok(ServerLockKeys { e_s, d_s })
    }

    /// `applyServerLock(kek_c, e_s) = kek_c^e_s mod p`
    pub fn apply_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }

    /// `removeServerLock(kek_cs, d_s) = kek_cs^d_s mod p`, the same
    /// modular exponentiation as [`Self::apply_lock`] with the
    /// decryption exponent.
    pub fn remove_lock(&self, base: &BigUint, exponent: &BigUint) -> BigUint {
        self.modexp(base, exponent)
    }
}

fn extended_gcd(a: BigInt, b: BigInt) -> (BigInt, BigInt, BigInt) {
    if b.is_zero() {
        return (a, BigInt::one(), BigInt::zero());
    }
    let (gcd, x1, y1) = extended_gcd(b.clone(), &a % &b);
    let x = y1.clone();
    let y = x1 - (&a / &b) * y1;
    (gcd, x, y)
}

pub fn encode_biguint_b64u(x: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(x.to_bytes_be())
}

pub fn decode_biguint_b64u(s: &str) -> Result<BigUint, ShamirError> {
    let bytes = URL_SAFE_NO_PAD.decode(s).map_err(|_| ShamirError::InvalidEncoding)?;
    Ok(BigUint::from_bytes_be(&bytes))
}
