//! Duplicate groups and the sinks that receive them.
//!
//! # Overview
//!
//! A [`DuplicateGroup`] is every record sharing one fingerprint, in merge
//! order. The merge engine hands finished groups to a [`GroupSink`] one at a
//! time, so a sink decides whether groups are streamed out or collected.
//!
//! # Example
//!
//! ```
//! use ctdupe::duplicates::{DuplicateGroup, GroupSink};
//! use ctdupe::record::CertRecord;
//!
//! let a = CertRecord::decode(r#"{"data":{"leaf_cert":{"fingerprint":"AB"}},"n":1}"#).unwrap();
//! let b = CertRecord::decode(r#"{"data":{"leaf_cert":{"fingerprint":"AB"}},"n":2}"#).unwrap();
//!
//! let group = DuplicateGroup::from_records("AB".to_string(), vec![a, b]);
//! assert_eq!(group.len(), 2);
//! assert_eq!(group.duplicate_count(), 1);
//!
//! let mut collected: Vec<DuplicateGroup> = Vec::new();
//! collected.write_group(group).unwrap();
//! assert_eq!(collected.len(), 1);
//! ```

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::record::CertRecord;

/// All records sharing one fingerprint.
///
/// Serializes as `{"fingerprint": ..., "certificates": [...]}` with every
/// certificate reproduced byte-for-byte as it appeared in the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// The shared `data.leaf_cert.fingerprint`
    pub fingerprint: String,
    /// Full original records, in merge order
    pub certificates: Vec<Box<RawValue>>,
}

impl DuplicateGroup {
    /// Create a group from raw certificate values.
    #[must_use]
    pub fn new(fingerprint: String, certificates: Vec<Box<RawValue>>) -> Self {
        Self {
            fingerprint,
            certificates,
        }
    }

    /// Create a group from decoded records, keeping their raw text.
    ///
    /// Debug assertion fails if a record carries a different fingerprint.
    #[must_use]
    pub fn from_records(fingerprint: String, records: Vec<CertRecord>) -> Self {
        let certificates = records
            .into_iter()
            .map(|record| {
                debug_assert_eq!(
                    record.fingerprint(),
                    fingerprint,
                    "Record fingerprint doesn't match group"
                );
                record.into_raw()
            })
            .collect();
        Self::new(fingerprint, certificates)
    }

    /// Number of records in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Number of extra copies (total - 1 original).
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.certificates.len().saturating_sub(1)
    }

    /// Raw JSON text of each certificate.
    pub fn certificate_texts(&self) -> impl Iterator<Item = &str> {
        self.certificates.iter().map(|c| c.get())
    }
}

/// Destination for duplicate groups produced by the merge.
///
/// Groups arrive in strictly ascending fingerprint order.
pub trait GroupSink {
    /// Accept one finished group.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the group cannot be stored or written.
    fn write_group(&mut self, group: DuplicateGroup) -> io::Result<()>;

    /// Flush anything buffered. Called once after the last group.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if flushing fails.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl GroupSink for Vec<DuplicateGroup> {
    fn write_group(&mut self, group: DuplicateGroup) -> io::Result<()> {
        self.push(group);
        Ok(())
    }
}

impl<S: GroupSink + ?Sized> GroupSink for &mut S {
    fn write_group(&mut self, group: DuplicateGroup) -> io::Result<()> {
        (**self).write_group(group)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}
