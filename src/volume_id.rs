//! Encoding and decoding of the opaque volume identifier.
//!
//! A volume identifier carries everything needed to address the backing
//! container without further lookups:
//!
//! ```text
//! resource-group#account#container#suffix#secret-namespace#subscription-id
//! ```
//!
//! Encoding always emits all six segments. Decoding accepts three to six
//! segments so identifiers minted by older releases, which stopped after the
//! container name, still resolve.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Separator placed between identifier segments.
pub const SEPARATOR: char = '#';

const MIN_SEGMENTS: usize = 3;
const MAX_SEGMENTS: usize = 6;

/// Decoded form of a volume identifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeId {
    /// Resource group holding the storage account. Empty means "use the
    /// controller's default resource group".
    pub resource_group: String,
    /// Storage account name.
    pub account: String,
    /// Container name backing the volume.
    pub container: String,
    /// Disambiguating suffix, set only when the container name was supplied
    /// by the caller.
    pub suffix: Option<String>,
    /// Namespace holding the persisted account credentials.
    pub secret_namespace: Option<String>,
    /// Subscription owning the account when it differs from the default.
    pub subscription_id: Option<String>,
}

/// Raised when a string does not decode to a [`VolumeId`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("volume id {volume_id:?} is not parseable: {reason}")]
pub struct NotParseable {
    /// Raw identifier supplied by the caller.
    pub volume_id: String,
    /// Human-readable description of the defect.
    pub reason: &'static str,
}

impl VolumeId {
    /// Builds an identifier for a container with no optional segments.
    #[must_use]
    pub fn new(
        resource_group: impl Into<String>,
        account: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            account: account.into(),
            container: container.into(),
            suffix: None,
            secret_namespace: None,
            subscription_id: None,
        }
    }

    /// Sets the disambiguating suffix.
    #[must_use]
    pub fn with_suffix(mut self, suffix: Option<String>) -> Self {
        self.suffix = suffix.filter(|value| !value.is_empty());
        self
    }

    /// Sets the secret namespace.
    #[must_use]
    pub fn with_secret_namespace(mut self, namespace: Option<String>) -> Self {
        self.secret_namespace = namespace.filter(|value| !value.is_empty());
        self
    }

    /// Sets the subscription identifier.
    #[must_use]
    pub fn with_subscription_id(mut self, subscription_id: Option<String>) -> Self {
        self.subscription_id = subscription_id.filter(|value| !value.is_empty());
        self
    }

    /// Renders the identifier. Always succeeds.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Parses an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`NotParseable`] when the segment count falls outside three to
    /// six or the account or container segment is empty.
    pub fn decode(raw: &str) -> Result<Self, NotParseable> {
        let fail = |reason| NotParseable {
            volume_id: raw.to_owned(),
            reason,
        };

        let segments: Vec<&str> = raw.split(SEPARATOR).collect();
        if segments.len() < MIN_SEGMENTS {
            return Err(fail("expected at least resource group, account and container"));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(fail("too many segments"));
        }

        let mut parts = segments.into_iter();
        let resource_group = parts.next().unwrap_or_default();
        let account = parts.next().unwrap_or_default();
        let container = parts.next().unwrap_or_default();
        if account.is_empty() {
            return Err(fail("account segment is empty"));
        }
        if container.is_empty() {
            return Err(fail("container segment is empty"));
        }

        let mut optional = || {
            parts
                .next()
                .filter(|value| !value.is_empty())
                .map(str::to_owned)
        };
        let suffix = optional();
        let secret_namespace = optional();
        let subscription_id = optional();

        Ok(Self {
            resource_group: resource_group.to_owned(),
            account: account.to_owned(),
            container: container.to_owned(),
            suffix,
            secret_namespace,
            subscription_id,
        })
    }

    /// Returns the name shared by every operation on the same logical
    /// volume: the caller-chosen volume name when it was recorded, otherwise
    /// the container name derived from it.
    #[must_use]
    pub fn logical_name(&self) -> &str {
        self.suffix.as_deref().unwrap_or(&self.container)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{rg}{sep}{account}{sep}{container}{sep}{suffix}{sep}{namespace}{sep}{subscription}",
            rg = self.resource_group,
            account = self.account,
            container = self.container,
            suffix = self.suffix.as_deref().unwrap_or_default(),
            namespace = self.secret_namespace.as_deref().unwrap_or_default(),
            subscription = self.subscription_id.as_deref().unwrap_or_default(),
            sep = SEPARATOR,
        )
    }
}

impl FromStr for VolumeId {
    type Err = NotParseable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn full_id() -> VolumeId {
        VolumeId::new("rg", "acct", "pvc-1")
            .with_suffix(Some(String::from("vol-1")))
            .with_secret_namespace(Some(String::from("kube-system")))
            .with_subscription_id(Some(String::from("sub-1")))
    }

    #[test]
    fn encode_emits_all_segments() {
        assert_eq!(full_id().encode(), "rg#acct#pvc-1#vol-1#kube-system#sub-1");
        assert_eq!(VolumeId::new("rg", "acct", "c1").encode(), "rg#acct#c1###");
    }

    #[rstest]
    #[case::full(full_id())]
    #[case::minimal(VolumeId::new("rg", "acct", "c1"))]
    #[case::default_group(VolumeId::new("", "acct", "c1"))]
    #[case::namespace_only(
        VolumeId::new("rg", "acct", "c1").with_secret_namespace(Some(String::from("ns")))
    )]
    fn decode_reverses_encode(#[case] id: VolumeId) {
        let decoded = VolumeId::decode(&id.encode())
            .unwrap_or_else(|err| panic!("decode {id}: {err}"));
        assert_eq!(decoded, id);
    }

    #[rstest]
    #[case::legacy_three("rg#acct#c1", None)]
    #[case::legacy_four("rg#acct#c1#vol", Some("vol"))]
    fn decode_accepts_short_legacy_layouts(#[case] raw: &str, #[case] suffix: Option<&str>) {
        let decoded = VolumeId::decode(raw).unwrap_or_else(|err| panic!("decode: {err}"));
        assert_eq!(decoded.container, "c1");
        assert_eq!(decoded.suffix.as_deref(), suffix);
        assert_eq!(decoded.subscription_id, None);
    }

    #[rstest]
    #[case::empty("")]
    #[case::plain("not-a-volume-id")]
    #[case::two("rg#acct")]
    #[case::seven("a#b#c#d#e#f#g")]
    #[case::empty_account("rg##c1")]
    #[case::empty_container("rg#acct#")]
    #[case::only_separators("#####")]
    fn decode_rejects_malformed_input(#[case] raw: &str) {
        let err = VolumeId::decode(raw).expect_err("malformed id should not decode");
        assert_eq!(err.volume_id, raw);
    }

    #[test]
    fn logical_name_prefers_suffix() {
        assert_eq!(full_id().logical_name(), "vol-1");
        assert_eq!(VolumeId::new("rg", "acct", "c1").logical_name(), "c1");
    }
}
