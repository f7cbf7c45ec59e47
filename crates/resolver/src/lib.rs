//! Handle verification against independent authorities
//!
//! A handle→DID binding is trusted only when two of three independent
//! sources agree: the handle's DNS TXT record, its well-known HTTPS
//! endpoint, and the directory service itself. Every outbound call takes a
//! permit from one shared [`CallLimiter`] injected into each client.

pub mod directory;
pub mod dns;
pub mod errors;
pub mod limiter;
pub mod retry;
pub mod verifier;
pub mod wellknown;

pub use directory::{Directory, PlcDirectory};
pub use dns::{DnsLookup, HickoryDns};
pub use errors::{ResolverError, Result};
pub use limiter::CallLimiter;
pub use verifier::{HandleVerifier, SourceValues, Verdict, VerifierConfig};
pub use wellknown::{HttpWellKnown, WellKnown};
