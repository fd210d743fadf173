//! Caller-address hygiene.
//!
//! Two layers keep network addresses out of storage and logs:
//!
//! - [`IdentityRedactor`] turns a raw address into a salted BLAKE3 key that
//!   the rate limiter can bucket on. The raw address is never stored.
//! - [`RedactingMakeWriter`] wraps the log sink so that every formatted line
//!   has IPv4 literals masked before it leaves the process.

use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

use ephemera_shared::constants::KDF_CONTEXT_RATE_KEY;

/// Replacement text for masked addresses.
const IP_REDACTED: &str = "[IP-REDACTED]";

static IPV4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("invalid IPv4 pattern")
});

/// Mask every IPv4 literal in `input`.
pub fn scrub_addresses(input: &str) -> Cow<'_, str> {
    IPV4_PATTERN.replace_all(input, IP_REDACTED)
}

// ---------------------------------------------------------------------------
// Identity redactor
// ---------------------------------------------------------------------------

/// Derives stable, non-reversible rate-limit keys from caller addresses.
#[derive(Clone)]
pub struct IdentityRedactor {
    key: [u8; 32],
}

impl IdentityRedactor {
    /// The salt is stretched into a BLAKE3 key once, up front.
    pub fn new(salt: &str) -> Self {
        Self {
            key: blake3::derive_key(KDF_CONTEXT_RATE_KEY, salt.as_bytes()),
        }
    }

    /// Keyed hash of `raw_address`, hex encoded and prefixed `addr:`.
    pub fn redact(&self, raw_address: &str) -> String {
        let digest = blake3::keyed_hash(&self.key, raw_address.as_bytes());
        format!("addr:{}", digest.to_hex())
    }
}

impl std::fmt::Debug for IdentityRedactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRedactor").finish_non_exhaustive()
    }
}

/// First few characters of a key, for log fields.
pub fn short_key(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(16)
        .map(|(i, _)| i)
        .unwrap_or(key.len());
    &key[..end]
}

// ---------------------------------------------------------------------------
// Log sink filter
// ---------------------------------------------------------------------------

/// A [`MakeWriter`] that masks IPv4 literals in everything written through
/// it. Install it as the fmt subscriber's writer.
#[derive(Debug, Clone)]
pub struct RedactingMakeWriter<M> {
    inner: M,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new(self.inner.make_writer())
    }
}

/// Buffers one log event and writes it, scrubbed, on flush or drop.
///
/// Buffering the whole event means an address split across several
/// `write` calls is still caught.
pub struct RedactingWriter<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.pending);
        let scrubbed = scrub_addresses(&text);
        self.inner.write_all(scrubbed.as_bytes())?;
        self.pending.clear();
        Ok(())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_scrub_masks_ipv4() {
        let out = scrub_addresses("request from 203.0.113.42 via 10.0.0.1");
        assert_eq!(out, "request from [IP-REDACTED] via [IP-REDACTED]");
    }

    #[test]
    fn test_scrub_leaves_other_text_borrowed() {
        let out = scrub_addresses("version 1.2.3 is fine");
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_redact_is_deterministic_and_salted() {
        let a = IdentityRedactor::new("salt-a");
        let b = IdentityRedactor::new("salt-b");

        assert_eq!(a.redact("198.51.100.7"), a.redact("198.51.100.7"));
        assert_ne!(a.redact("198.51.100.7"), a.redact("198.51.100.8"));
        assert_ne!(a.redact("198.51.100.7"), b.redact("198.51.100.7"));
    }

    #[test]
    fn test_redacted_key_hides_address() {
        let key = IdentityRedactor::new("salt").redact("198.51.100.7");
        assert!(key.starts_with("addr:"));
        assert!(!key.contains("198.51.100.7"));
        assert_eq!(key.len(), "addr:".len() + 64);
    }

    #[test]
    fn test_writer_scrubs_split_writes() {
        let mut sink = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut sink);
            writer.write_all(b"peer 192.168.").unwrap();
            writer.write_all(b"1.20 joined\n").unwrap();
        }
        assert_eq!(String::from_utf8(sink).unwrap(), "peer [IP-REDACTED] joined\n");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_subscriber_output_is_scrubbed() {
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(RedactingMakeWriter::new(move || sink.clone()))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let origin = "172.16.5.4";
            tracing::info!(origin, "session opened from {}", origin);
        });

        let out = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(out.contains("session opened from [IP-REDACTED]"));
        assert!(!out.contains("172.16.5.4"));
    }
}
