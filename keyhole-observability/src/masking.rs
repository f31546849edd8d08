//! Secret masking.
//!
//! One [`SecretMasker`] is built at configuration load from every secret
//! value in the active configuration, and is applied to any string before it
//! enters a log record or a response body. Known secrets are replaced
//! longest-first so a secret that embeds another is not left half masked.
//! Tokens following plugin-declared prefixes are masked as well, because
//! upstream error messages sometimes echo credentials the configuration has
//! never seen (rotated tokens, sibling accounts).

use regex::Regex;

/// Replacement marker for all masked values.
pub const MASK: &str = "***";

pub struct SecretMasker {
    /// Configured secret values, longest first.
    secrets: Vec<String>,
    /// Compiled prefix-token patterns.
    prefixes: Vec<Regex>,
}

impl SecretMasker {
    /// Build a masker from configured secret values and plugin token
    /// prefixes. Empty secrets are dropped; duplicates collapse.
    pub fn new(mut secrets: Vec<String>, token_prefixes: &[&str]) -> Self {
        secrets.retain(|s| !s.is_empty());
        secrets.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        secrets.dedup();

        let prefixes = token_prefixes
            .iter()
            .filter_map(|&prefix| {
                Regex::new(&format!(r"{}[A-Za-z0-9._/+-]+", regex::escape(prefix)))
                    .map_err(|e| tracing::warn!(prefix, error = %e, "invalid token prefix"))
                    .ok()
            })
            .collect();

        Self { secrets, prefixes }
    }

    /// A masker that only knows the prefix patterns. Used before the
    /// registry exists (startup error paths).
    pub fn empty() -> Self {
        Self { secrets: Vec::new(), prefixes: Vec::new() }
    }

    /// Replace every configured secret and every prefix-shaped token in
    /// `input` with [`MASK`].
    pub fn mask(&self, input: &str) -> String {
        let mut out = input.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        for pattern in &self.prefixes {
            out = pattern.replace_all(&out, MASK).into_owned();
        }
        out
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }
}

impl std::fmt::Debug for SecretMasker {
    // Never expose the secret list itself.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretMasker")
            .field("secrets", &self.secrets.len())
            .field("prefixes", &self.prefixes.len())
            .finish()
    }
}

/// Short masked hint for a secret, safe for `/auth/status` bodies:
/// `cfp_a1b2c3d4e5` becomes `cfp_***`. Secrets too short to reveal a prefix
/// collapse to the bare marker. Secrets are opaque strings, so the prefix is
/// taken by chars, never by byte index.
pub fn mask_secret_hint(secret: &str) -> String {
    if secret.chars().count() > 8 {
        let prefix: String = secret.chars().take(4).collect();
        format!("{prefix}{MASK}")
    } else {
        MASK.to_string()
    }
}

/// Partial-mask an email address: first and last character of the local
/// part stay visible, the domain stays visible. Values that do not look
/// like an email collapse to the bare marker.
pub fn mask_email(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
            let mut chars = local.chars();
            let first = chars.next().unwrap_or('?');
            if local.chars().count() >= 2 {
                let last = local.chars().last().unwrap_or('?');
                format!("{first}{MASK}{last}@{domain}")
            } else {
                format!("{first}{MASK}@{domain}")
            }
        }
        _ => MASK.to_string(),
    }
}
