// Copyright (c) 2025-2026 Runa Contributors
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use tracing::warn;

/// Well-known CA bundle locations across common distributions.
const CA_BUNDLE_CANDIDATES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/ca-bundle.pem",
    "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem",
    "/etc/ssl/cert.pem",
];

/// Locate a CA bundle for outbound TLS.
///
/// `SSL_CERT_FILE` takes precedence; otherwise the first existing candidate
/// path wins.  Returns `None` (with a warning) when nothing is found — the
/// HTTP client then falls back to its built-in roots.
pub fn find_ca_bundle() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("SSL_CERT_FILE") {
        let p = PathBuf::from(explicit);
        if p.is_file() {
            return Some(p);
        }
        warn!(path = %p.display(), "SSL_CERT_FILE is set but does not exist");
    }
    for candidate in CA_BUNDLE_CANDIDATES {
        let p = PathBuf::from(candidate);
        if p.is_file() {
            return Some(p);
        }
    }
    warn!("no CA bundle found in common locations; using built-in roots");
    None
}
