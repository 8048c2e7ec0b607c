//! Maintain the referrers of a manifest when the registry does not
//! implement the referrers API.
//!
//! In that case, the list of referrers is stored in an image index
//! tagged with the digest of the subject (see [`build_referrers_tag`]).
//! Updating it is a read-modify-write cycle: fetch the current index,
//! apply the changes with [`apply_referrer_changes`], and upload the
//! result.
//!
//! There is no atomicity against the registry. Callers must serialize
//! the cycle for the same subject.

use std::collections::{hash_map::Entry, HashMap};

use crate::{digest::DigestError, BasicDescriptor, Descriptor, Digest};


/// Whether a repository implements the referrers API.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReferrersState {
    Unknown = 0,
    Supported = 1,
    NotSupported = 2,
}

impl ReferrersState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ReferrersState::Supported,
            2 => ReferrersState::NotSupported,
            _ => ReferrersState::Unknown,
        }
    }
}

impl From<bool> for ReferrersState {
    fn from(supported: bool) -> Self {
        if supported {
            ReferrersState::Supported
        } else {
            ReferrersState::NotSupported
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReferrerOperation {
    Add,
    Delete,
}

/// A referrer to add to, or delete from, a referrers list.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferrerChange {
    pub referrer: Descriptor,
    pub operation: ReferrerOperation,
}

impl ReferrerChange {
    pub fn add(referrer: Descriptor) -> Self {
        ReferrerChange {
            referrer,
            operation: ReferrerOperation::Add,
        }
    }

    pub fn delete(referrer: Descriptor) -> Self {
        ReferrerChange {
            referrer,
            operation: ReferrerOperation::Delete,
        }
    }
}

/// Errors from [`apply_referrer_changes`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ReferrersError {
    #[error("Invalid argument: {0}.")]
    InvalidArgument(&'static str),

    /// The changes leave the referrers list as it was. Nothing has to
    /// be written to the registry.
    #[error("No referrers update needed.")]
    NoUpdateNeeded,
}

/// Tag of the referrers index for `subject`, following the
/// [referrers tag schema][schema]: `<alg>-<ref>`.
///
/// [schema]: https://github.com/opencontainers/distribution-spec/blob/main/spec.md#referrers-tag-schema
///
/// ```
/// # use oci_referrers::*;
/// let subject = Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"{}");
/// let tag = build_referrers_tag(&subject).unwrap();
///
/// assert_eq!(
///     tag,
///     "sha256-44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
/// );
/// ```
pub fn build_referrers_tag(subject: &Descriptor) -> Result<String, DigestError> {
    let digest = Digest::try_from(subject.digest.as_str())?;
    Ok(format!(
        "{}-{}",
        digest.algorithm().as_str(),
        digest.hash_value()
    ))
}

/// Apply `changes` to `old_referrers`, and return the updated list.
///
/// * Referrers are identified by their [`BasicDescriptor`]. Adding a
///   referrer already in the list, or deleting one that is not in it,
///   has no effect.
/// * Empty descriptors and duplicates in `old_referrers` (left by a
///   previous update that did not complete) are removed.
/// * The order of the list is preserved. New referrers are appended.
///
/// If the result has the same referrers as `old_referrers`, and there was
/// nothing to clean up, it returns [`ReferrersError::NoUpdateNeeded`].
pub fn apply_referrer_changes(
    old_referrers: Option<&[Descriptor]>,
    changes: Option<&[ReferrerChange]>,
) -> Result<Vec<Descriptor>, ReferrersError> {
    let (Some(old_referrers), Some(changes)) = (old_referrers, changes) else {
        return Err(ReferrersError::InvalidArgument(
            "old referrers and referrer changes are required",
        ));
    };

    // Candidate output. Deleted entries are set to `None`, so positions
    // in `slots` are stable until the final compaction.
    let mut slots: Vec<Option<&Descriptor>> =
        Vec::with_capacity(old_referrers.len() + changes.len());
    let mut positions: HashMap<BasicDescriptor<'_>, usize> = HashMap::new();
    let mut update_required = false;

    for referrer in old_referrers {
        if referrer.is_empty() {
            update_required = true;
            continue;
        }

        match positions.entry(referrer.basic()) {
            Entry::Occupied(_) => update_required = true,
            Entry::Vacant(entry) => {
                entry.insert(slots.len());
                slots.push(Some(referrer));
            }
        }
    }

    for change in changes {
        let referrer = &change.referrer;
        if referrer.is_empty() {
            continue;
        }

        match change.operation {
            ReferrerOperation::Add => {
                if let Entry::Vacant(entry) = positions.entry(referrer.basic()) {
                    entry.insert(slots.len());
                    slots.push(Some(referrer));
                }
            }

            ReferrerOperation::Delete => {
                if let Some(position) = positions.remove(&referrer.basic()) {
                    slots[position] = None;
                }
            }
        }
    }

    if !update_required
        && positions.len() == old_referrers.len()
        && old_referrers
            .iter()
            .all(|r| positions.contains_key(&r.basic()))
    {
        tracing::trace!(referrers = old_referrers.len(), "Referrers list unchanged");
        return Err(ReferrersError::NoUpdateNeeded);
    }

    let updated: Vec<Descriptor> = slots.into_iter().flatten().cloned().collect();
    debug_assert_eq!(updated.len(), positions.len());

    tracing::debug!(
        old = old_referrers.len(),
        new = updated.len(),
        "Referrers list updated"
    );

    Ok(updated)
}

#[cfg(test)]
fn referrer(content: &str) -> Descriptor {
    Descriptor::from_content(crate::MediaType::OciManifestV1.as_str(), content.as_bytes())
}

#[cfg(test)]
fn apply(
    old: &[Descriptor],
    changes: &[ReferrerChange],
) -> Result<Vec<Descriptor>, ReferrersError> {
    apply_referrer_changes(Some(old), Some(changes))
}

#[test]
fn missing_arguments() {
    let old = [referrer("a")];
    let changes = [ReferrerChange::add(referrer("b"))];

    assert!(matches!(
        apply_referrer_changes(None, Some(&changes[..])),
        Err(ReferrersError::InvalidArgument(_))
    ));

    assert!(matches!(
        apply_referrer_changes(Some(&old[..]), None),
        Err(ReferrersError::InvalidArgument(_))
    ));
}

#[test]
fn no_changes_is_not_an_update() {
    let old = [referrer("a"), referrer("b")];
    assert_eq!(apply(&old, &[]), Err(ReferrersError::NoUpdateNeeded));
    assert_eq!(apply(&[], &[]), Err(ReferrersError::NoUpdateNeeded));

    // Adding existing referrers, and deleting unknown ones.
    let changes = [
        ReferrerChange::add(referrer("a")),
        ReferrerChange::delete(referrer("x")),
        ReferrerChange::add(Descriptor::default()),
    ];

    assert_eq!(apply(&old, &changes), Err(ReferrersError::NoUpdateNeeded));
}

#[test]
fn add_delete_add() {
    let d = referrer("d");
    let changes = [
        ReferrerChange::add(d.clone()),
        ReferrerChange::delete(d.clone()),
        ReferrerChange::add(d.clone()),
    ];

    assert_eq!(apply(&[], &changes), Ok(vec![d]));
}

#[test]
fn delete_preserves_order() {
    let (a, b, c) = (referrer("a"), referrer("b"), referrer("c"));
    let old = [a.clone(), b.clone(), c.clone()];

    assert_eq!(
        apply(&old, &[ReferrerChange::delete(b.clone())]),
        Ok(vec![a.clone(), c.clone()])
    );

    // New referrers are appended after the existing ones.
    let d = referrer("d");
    let changes = [
        ReferrerChange::add(d.clone()),
        ReferrerChange::delete(a.clone()),
    ];

    assert_eq!(apply(&old, &changes), Ok(vec![b, c, d]));
}

#[test]
fn delete_everything() {
    let (a, b) = (referrer("a"), referrer("b"));
    let changes = [
        ReferrerChange::delete(b.clone()),
        ReferrerChange::delete(a.clone()),
    ];

    assert_eq!(apply(&[a, b], &changes), Ok(vec![]));
}

#[test]
fn delete_unknown_does_not_cancel_other_changes() {
    let (a, b) = (referrer("a"), referrer("b"));
    let changes = [
        ReferrerChange::delete(referrer("x")),
        ReferrerChange::add(b.clone()),
    ];

    assert_eq!(apply(&[a.clone()], &changes), Ok(vec![a, b]));
}

#[test]
fn remove_duplicates() {
    let a = referrer("a");
    let a_annotated = a.clone().with_annotation("org.example", "1");

    assert_eq!(apply(&[a.clone(), a_annotated], &[]), Ok(vec![a]));
}

#[test]
fn remove_empty_descriptors() {
    let (a, b) = (referrer("a"), referrer("b"));
    let old = [Descriptor::default(), a.clone(), Descriptor::default(), b.clone()];

    assert_eq!(apply(&old, &[]), Ok(vec![a, b]));
}

#[test]
fn duplicates_and_deletes() {
    let (a, b) = (referrer("a"), referrer("b"));

    // The duplicate is dropped, and deleting `a` removes its only copy.
    let old = [a.clone(), b.clone(), a.clone()];
    assert_eq!(
        apply(&old, &[ReferrerChange::delete(a.clone())]),
        Ok(vec![b.clone()])
    );

    // Deleting and adding back a duplicated referrer moves it to the end.
    let changes = [
        ReferrerChange::delete(a.clone()),
        ReferrerChange::add(a.clone()),
    ];
    assert_eq!(apply(&old, &changes), Ok(vec![b.clone(), a.clone()]));
}

#[test]
fn readding_a_deleted_referrer_is_not_an_update() {
    // Only membership is compared: moving `a` to the end is not enough
    // to write a new index.
    let (a, b) = (referrer("a"), referrer("b"));
    let changes = [
        ReferrerChange::delete(a.clone()),
        ReferrerChange::add(a.clone()),
    ];

    assert_eq!(apply(&[a, b], &changes), Err(ReferrersError::NoUpdateNeeded));
}

#[test]
fn referrers_tag() {
    let subject = referrer("subject");
    let tag = build_referrers_tag(&subject).unwrap();

    assert_eq!(tag, build_referrers_tag(&subject).unwrap());
    assert_eq!(tag, subject.digest.replacen(':', "-", 1));
    assert_ne!(tag, build_referrers_tag(&referrer("other")).unwrap());

    let (algorithm, value) = tag.split_once('-').unwrap();
    assert_eq!(algorithm, "sha256");
    assert!(value.bytes().all(|c| matches!(c, b'0'..=b'9' | b'a'..=b'f')));

    assert_eq!(
        build_referrers_tag(&Descriptor::default()),
        Err(DigestError::InvalidAlgorithm)
    );
}
