//! The server side of the Shamir 3-pass commutative cipher used to
//! double-lock a client's VRF-key-encryption-key without the relay ever
//! learning the key it protects.

pub mod config;
pub mod keyid;
pub mod routes;
pub mod shamir;
