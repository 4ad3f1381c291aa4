//! Single-pass secret redaction over mechanism stdout/stderr before it is
//! logged, notified, or attached to a ticket. Grounded on spec.md §3's
//! redaction invariant and the original's `ipmitool.py`
//! `.replace(password, 'secret')` calls, generalized to a multi-pattern
//! matcher so every known secret is scrubbed in one pass instead of one
//! `.replace()` per credential.

use aho_corasick::AhoCorasick;
use secrecy::{ExposeSecret, SecretString};

const REDACTED: &str = "secret";

/// A redactor built from the credential set relevant to one job. Built
/// once per attempt and dropped after use; never logged or persisted
/// itself.
pub struct Redactor {
    matcher: Option<AhoCorasick>,
}

impl Redactor {
    /// `secrets` may contain empty strings (absent credentials); those are
    /// skipped so an empty pattern doesn't match every offset.
    pub fn new(secrets: &[&SecretString]) -> Self {
        let patterns: Vec<&str> = secrets
            .iter()
            .map(|s| s.expose_secret())
            .filter(|s| !s.is_empty())
            .collect();

        let matcher = if patterns.is_empty() {
            None
        } else {
            AhoCorasick::new(patterns).ok()
        };

        Redactor { matcher }
    }

    pub fn redact(&self, text: &str) -> String {
        match &self.matcher {
            Some(matcher) => matcher.replace_all(text, &vec![REDACTED; matcher.patterns_len()]),
            None => text.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_every_known_secret_in_one_pass() {
        let password = SecretString::from("hunter2".to_string());
        let community = SecretString::from("private".to_string());
        let redactor = Redactor::new(&[&password, &community]);

        let out = redactor.redact("ipmitool -P hunter2 chassis power status; snmpset -c private ...");
        assert_eq!(out, "ipmitool -P secret chassis power status; snmpset -c secret ...");
    }

    #[test]
    fn empty_secret_set_is_a_no_op() {
        let redactor = Redactor::new(&[]);
        assert_eq!(redactor.redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn skips_empty_credential_strings() {
        let empty = SecretString::from(String::new());
        let real = SecretString::from("s3cr3t".to_string());
        let redactor = Redactor::new(&[&empty, &real]);
        assert_eq!(redactor.redact("token=s3cr3t"), "token=secret");
    }
}
