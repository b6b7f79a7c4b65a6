//! Install the process-wide `rustls` `CryptoProvider` (§11 ambient stack).
//!
//! `reqwest`'s `rustls-tls-webpki-roots-no-provider` feature (the teacher's
//! choice, kept here per `SPEC_FULL.md` §11) deliberately omits a default
//! crypto backend so applications can pick one explicitly; skipping this
//! leaves every HTTPS request panicking at the first TLS handshake. Mirrors
//! `rust-srec/src/utils/http_client::install_rustls_provider`.
pub fn install_provider() {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls CryptoProvider already installed");
    }
}
