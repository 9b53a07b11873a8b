//! Revision selection.
//!
//! The Apigee API returns revision labels as strings in no reliable order
//! (listings come back sorted alphabetically: `1, 10, 2, 3, ...`). The
//! canonical revision is always the numeric maximum.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Return the numerically greatest revision in `labels`.
///
/// Every label must parse as a base-10 integer; a bad label is an API
/// contract violation and is reported rather than skipped.
///
/// ```
/// use apigee_provider::revision::latest_revision;
///
/// assert_eq!(latest_revision(&["1", "10", "2", "3"]).unwrap(), 10);
/// assert!(latest_revision::<&str>(&[]).is_err());
/// ```
pub fn latest_revision<S: AsRef<str>>(labels: &[S]) -> Result<u32, ProviderError> {
    let mut latest: Option<u32> = None;
    for label in labels {
        let revision = parse_label(label.as_ref())?;
        latest = Some(latest.map_or(revision, |current| current.max(revision)));
    }
    latest.ok_or_else(|| ProviderError::NoRevisionsFound("an empty revision listing".to_string()))
}

fn parse_label(label: &str) -> Result<u32, ProviderError> {
    label
        .parse::<u32>()
        .map_err(|_| ProviderError::InvalidRevisionLabel(label.to_string()))
}

/// The revision labels returned by one listing call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionSet {
    labels: Vec<String>,
}

impl RevisionSet {
    /// Wrap a list of labels.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the listing was empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// The raw labels, in the order the API returned them.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// The labels parsed as integers, in input order.
    pub fn revisions(&self) -> Result<Vec<u32>, ProviderError> {
        self.labels.iter().map(|l| parse_label(l)).collect()
    }

    /// The numerically greatest revision.
    pub fn latest(&self) -> Result<u32, ProviderError> {
        latest_revision(&self.labels)
    }

    /// Whether `revision` is in the set.
    pub fn contains(&self, revision: u32) -> bool {
        self.labels
            .iter()
            .any(|l| parse_label(l).map_or(false, |r| r == revision))
    }
}

impl<S: Into<String>> FromIterator<S> for RevisionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
