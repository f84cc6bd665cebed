//! Recipient resolution.
//!
//! A project's failures go to `private@<list>.<mail_domain>`. The list name
//! is the namespace unless an explicit override or the committee mail map
//! names another one. Configured extra recipients (the operating team) are
//! copied on every message.

use dist_integrity_common::Namespace;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

const MAIL_MAP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct CommitteeInfo {
    committees: BTreeMap<String, Committee>,
}

#[derive(Debug, Deserialize)]
struct Committee {
    mail_list: Option<String>,
}

/// Errors from fetching or decoding the committee mail map.
#[derive(Debug, thiserror::Error)]
pub enum MailMapError {
    /// The request failed.
    #[error("failed to fetch mail map from {url}: {reason}")]
    Fetch {
        /// Requested URL.
        url: String,
        /// Transport error text.
        reason: String,
    },
    /// The payload was not committee-info JSON.
    #[error("mail map from {url} is not valid committee JSON: {source}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a committee-info document into a namespace → list table.
///
/// # Errors
///
/// Returns the JSON error when `json` is not a committee-info document.
pub fn parse_mail_map(json: &[u8]) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let info: CommitteeInfo = serde_json::from_slice(json)?;
    Ok(info
        .committees
        .into_iter()
        .filter_map(|(name, committee)| committee.mail_list.map(|list| (name, list)))
        .collect())
}

/// Fetch and parse the committee mail map at `url`.
///
/// # Errors
///
/// Returns [`MailMapError`] when the request or decoding fails.
pub fn fetch_mail_map(url: &str) -> Result<BTreeMap<String, String>, MailMapError> {
    let fetch_error = |reason: String| MailMapError::Fetch {
        url: url.to_owned(),
        reason,
    };
    let body = http_agent()
        .get(url)
        .call()
        .map_err(|err| fetch_error(err.to_string()))?
        .into_body()
        .read_to_vec()
        .map_err(|err| fetch_error(err.to_string()))?;
    parse_mail_map(&body).map_err(|source| MailMapError::Decode {
        url: url.to_owned(),
        source,
    })
}

fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(MAIL_MAP_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Maps a namespace to its addressees.
#[derive(Debug, Clone, Default)]
pub struct RecipientResolver {
    mail_domain: String,
    overrides: BTreeMap<String, String>,
    mail_map: BTreeMap<String, String>,
    extra: Vec<String>,
}

impl RecipientResolver {
    /// Create a resolver for addresses under `mail_domain`.
    #[must_use]
    pub fn new(mail_domain: impl Into<String>) -> Self {
        Self {
            mail_domain: mail_domain.into(),
            ..Self::default()
        }
    }

    /// Explicit namespace → list overrides. These win over the mail map.
    #[must_use]
    pub fn with_overrides(mut self, overrides: BTreeMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Addresses copied on every message.
    #[must_use]
    pub fn with_extra_recipients(mut self, extra: Vec<String>) -> Self {
        self.extra = extra;
        self
    }

    /// Replace the committee mail map.
    pub fn set_mail_map(&mut self, mail_map: BTreeMap<String, String>) {
        self.mail_map = mail_map;
    }

    /// Addressees for `namespace`, project list first, without duplicates.
    ///
    /// # Examples
    ///
    /// ```
    /// use dist_integrity_checker::notify::RecipientResolver;
    /// use dist_integrity_common::Namespace;
    ///
    /// let resolver = RecipientResolver::new("example.org")
    ///     .with_extra_recipients(vec!["ops@example.org".to_owned()]);
    /// let ns = Namespace::try_from("httpd").unwrap();
    /// assert_eq!(
    ///     resolver.recipients_for(&ns),
    ///     vec!["private@httpd.example.org", "ops@example.org"],
    /// );
    /// ```
    #[must_use]
    pub fn recipients_for(&self, namespace: &Namespace) -> Vec<String> {
        let name = namespace.as_str();
        let list = self
            .overrides
            .get(name)
            .or_else(|| self.mail_map.get(name))
            .map_or(name, String::as_str);
        let mut recipients = vec![format!("private@{list}.{}", self.mail_domain)];
        for extra in &self.extra {
            if !recipients.contains(extra) {
                recipients.push(extra.clone());
            }
        }
        recipients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ns(value: &str) -> Namespace {
        Namespace::try_from(value).expect("namespace")
    }

    fn resolver() -> RecipientResolver {
        let mut resolver = RecipientResolver::new("apache.org").with_overrides(BTreeMap::from([(
            "incubator".to_owned(),
            "general".to_owned(),
        )]));
        resolver.set_mail_map(BTreeMap::from([
            ("whimsy".to_owned(), "tools".to_owned()),
            ("incubator".to_owned(), "ignored".to_owned()),
        ]));
        resolver
    }

    #[rstest]
    #[case("httpd", "private@httpd.apache.org")]
    #[case("whimsy", "private@tools.apache.org")]
    #[case("incubator", "private@general.apache.org")]
    fn project_list_is_resolved(#[case] namespace: &str, #[case] expected: &str) {
        assert_eq!(resolver().recipients_for(&ns(namespace)), vec![expected]);
    }

    #[test]
    fn extra_recipients_are_appended_once() {
        let resolver = RecipientResolver::new("apache.org").with_extra_recipients(vec![
            "root@apache.org".to_owned(),
            "root@apache.org".to_owned(),
        ]);
        assert_eq!(
            resolver.recipients_for(&ns("foo")),
            vec!["private@foo.apache.org", "root@apache.org"]
        );
    }

    #[test]
    fn committee_json_yields_list_names() {
        let json = br#"{
            "last_updated": "2026-01-01",
            "committees": {
                "whimsy": {"display_name": "Whimsy", "mail_list": "tools"},
                "httpd": {"display_name": "HTTP Server"}
            }
        }"#;
        let map = parse_mail_map(json).expect("valid committee json");
        assert_eq!(map.get("whimsy").map(String::as_str), Some("tools"));
        assert!(!map.contains_key("httpd"));
    }

    #[test]
    fn non_committee_json_is_rejected() {
        assert!(parse_mail_map(b"[1, 2, 3]").is_err());
    }
}
