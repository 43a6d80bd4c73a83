//! Test account secrets and placeholder substitution.
//!
//! Secrets are read from the environment once per batch and passed explicitly
//! to every scenario. `Credentials` never prints its values.
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use std::sync::OnceLock;

pub const USERNAME_VAR: &str = "TEST_USERNAME";
pub const PASSWORD_VAR: &str = "TEST_PASSWORD";
pub const USERNAME_PLACEHOLDER: &str = "$TEST_USERNAME";
pub const PASSWORD_PLACEHOLDER: &str = "$TEST_PASSWORD";
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Default)]
pub struct Credentials {
    username: Option<SecretString>,
    password: Option<SecretString>,
}

impl Credentials {
    /// Empty values count as unset.
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        let secret = |value: Option<String>| {
            value
                .filter(|value| !value.is_empty())
                .map(SecretString::from)
        };
        Self {
            username: secret(username),
            password: secret(password),
        }
    }

    pub fn from_env() -> Self {
        Self::new(env::var(USERNAME_VAR).ok(), env::var(PASSWORD_VAR).ok())
    }

    /// Names of the environment variables that were not set.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username.is_none() {
            missing.push(USERNAME_VAR);
        }
        if self.password.is_none() {
            missing.push(PASSWORD_VAR);
        }
        missing
    }

    /// Replace every placeholder in `template`; unset secrets become "".
    pub fn resolve(&self, template: &str) -> String {
        let expose = |secret: &Option<SecretString>| {
            secret
                .as_ref()
                .map(|value| value.expose_secret().to_string())
                .unwrap_or_default()
        };
        substitute(template, &expose(&self.username), &expose(&self.password))
    }

    /// Mask every secret value that occurs in `text`.
    ///
    /// Agent diagnostics can echo the resolved task; run this on anything
    /// agent-produced before it is logged or persisted.
    pub fn redact(&self, text: &str) -> String {
        // Longer value first so a password containing the username stays masked.
        let mut secrets: Vec<&str> = [&self.username, &self.password]
            .into_iter()
            .flatten()
            .map(|secret| secret.expose_secret())
            .collect();
        secrets.sort_by_key(|secret| std::cmp::Reverse(secret.len()));
        secrets
            .into_iter()
            .fold(text.to_string(), |text, secret| text.replace(secret, REDACTED))
    }
}

/// Username is substituted before password.
pub fn substitute(template: &str, username: &str, password: &str) -> String {
    template
        .replace(USERNAME_PLACEHOLDER, username)
        .replace(PASSWORD_PLACEHOLDER, password)
}

/// Known placeholders that appear in `text`.
pub fn placeholders_in(text: &str) -> Vec<&'static str> {
    [USERNAME_PLACEHOLDER, PASSWORD_PLACEHOLDER]
        .into_iter()
        .filter(|placeholder| text.contains(placeholder))
        .collect()
}

/// `$TEST_*` tokens that will be sent to the agent verbatim.
pub fn unknown_placeholders(text: &str) -> Vec<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"\$TEST_[A-Za-z0-9_]+").expect("token regex"));
    let mut unknown: Vec<String> = Vec::new();
    for found in token.find_iter(text).map(|found| found.as_str()) {
        if found == USERNAME_PLACEHOLDER || found == PASSWORD_PLACEHOLDER {
            continue;
        }
        if !unknown.iter().any(|seen| seen == found) {
            unknown.push(found.to_string());
        }
    }
    unknown
}
