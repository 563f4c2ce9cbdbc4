//! Relay configuration: host/port to bind, the group prime, and the
//! server's lock keypair — all loadable from CLI flags or environment
//! variables via `clap`'s `env` attribute, the same override order
//! `openibank-api-server`'s `Args` struct uses.

use crate::shamir::{ServerLockKeys, ShamirGroup};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "shamir-relay")]
#[command(author, version, about = "Server-side Shamir 3-pass lock relay", long_about = None)]
pub struct Args {
    /// Host to bind to.
    #[arg(long, env = "SHAMIR_RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "SHAMIR_RELAY_PORT", default_value_t = 4321)]
    pub port: u16,

    /// Base64url-encoded group prime `p`. Falls back to the compiled-in
    /// default prime when unset — fine for development, not for a
    /// shared deployment.
    #[arg(long, env = "SHAMIR_RELAY_PRIME_B64U")]
    pub prime_b64u: Option<String>,

    /// Base64url-encoded encryption exponent `e_s`. When this and
    /// `--decryption-exponent-b64u` are both unset, a fresh keypair is
    /// generated on startup and logged once (it is never persisted by
    /// this binary).
    #[arg(long, env = "SHAMIR_RELAY_E_S_B64U", requires = "decryption_exponent_b64u")]
    pub encryption_exponent_b64u: Option<String>,

    /// Base64url-encoded decryption exponent `d_s`.
    #[arg(long, env = "SHAMIR_RELAY_D_S_B64U", requires = "encryption_exponent_b64u")]
    pub decryption_exponent_b64u: Option<String>,

    /// Log level passed through to `tracing_subscriber`'s env filter.
    #[arg(long, env = "SHAMIR_RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn group(&self) -> anyhow::Result<ShamirGroup> {
        match &self.prime_b64u {
            Some(p) => Ok(ShamirGroup::from_b64u(p)?),
            None => Ok(ShamirGroup::default_prime()),
        }
    }

    /// Resolves the server's lock keypair from configured exponents, or
    /// generates and logs a fresh one.
    pub fn server_keys(&self, group: &ShamirGroup) -> anyhow::Result<ServerLockKeys> {
        use crate::shamir::decode_biguint_b64u;
        match (&self.encryption_exponent_b64u, &self.decryption_exponent_b64u) {
            (Some(e), Some(d)) => Ok(ServerLockKeys {
                e_s: decode_biguint_b64u(e)?,
                d_s: decode_biguint_b64u(d)?,
            }),
            _ => {
                let keys = group.generate_keypair()?;
                tracing::warn!(
                    e_s_b64u = %crate::shamir::encode_biguint_b64u(&keys.e_s),
                    d_s_b64u = %crate::shamir::encode_biguint_b64u(&keys.d_s),
                    "generated an ephemeral server keypair on startup; persist these to keep KEKs unlockable across restarts"
                );
                Ok(keys)
            }
        }
    }
}
