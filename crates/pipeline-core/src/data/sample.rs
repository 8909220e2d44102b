//! The unit of dataflow: a payload plus metadata, timestamps, a
//! set-once attribute map, and cue flags.
//!
//! Grounded on `original_source/src/lib_modules/core/data.cpp` /
//! `database.hpp`: `DataBase` (metadata + media time), `DataBaseRef`
//! (shares another sample's payload while carrying its own metadata/
//! timestamps — the "zero-copy re-emission" case) and `DataRaw` (an
//! owned, recyclable byte buffer). Rust encodes the `DataBase`/
//! `DataBaseRef` class hierarchy as a `Payload` enum rather than a base
//! class + dynamic cast, per spec.md §9 Design Notes ("Shared ownership
//! of samples").

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SampleError;

use super::metadata::Metadata;

/// `DATA_FLAGS_KEYFRAME` / `DATA_FLAGS_DISCONTINUITY` in the original.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CueFlags {
    pub keyframe: bool,
    pub discontinuity: bool,
}

/// Keys for the small set-once attribute map (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKey {
    PresentationTime,
    DecodingTime,
    CueFlags,
    /// Room for filter-specific attributes (e.g. the Rectifier's
    /// replayed-subtitle bookkeeping) without growing this enum per filter.
    Custom(u32),
}

/// A sample's byte payload: either owned (pool-allocated, recyclable) or
/// a shared reference into another sample's payload (zero-copy
/// re-emission, not recyclable — matches `DataBaseRef::isRecyclable()`
/// delegating to the referenced sample).
#[derive(Debug, Clone)]
pub enum Payload {
    Owned(Vec<u8>),
    Shared(Arc<Vec<u8>>),
}

impl Payload {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Owned(v) => v.as_slice(),
            Payload::Shared(v) => v.as_slice(),
        }
    }

    pub fn is_recyclable(&self) -> bool {
        matches!(self, Payload::Owned(_))
    }
}

/// The unit of dataflow (spec.md §3). `None` in an `Output::post` call
/// denotes end-of-stream; `Sample` itself is always a real sample.
#[derive(Debug, Clone)]
pub struct Sample {
    payload: Payload,
    metadata: Option<Arc<Metadata>>,
    presentation_time: i64,
    decoding_time: i64,
    cue_flags: CueFlags,
    attributes: HashMap<AttributeKey, Vec<u8>>,
}

impl Sample {
    /// Creates a new owned, recyclable sample from a raw buffer
    /// (`DataRaw::DataRaw(size)` in the original, here taking the bytes
    /// directly since Rust's allocator already manages growth).
    pub fn raw(payload: Vec<u8>) -> Self {
        Self {
            payload: Payload::Owned(payload),
            metadata: None,
            presentation_time: 0,
            decoding_time: 0,
            cue_flags: CueFlags::default(),
            attributes: HashMap::new(),
        }
    }

    /// Creates a sample that shares another sample's payload but carries
    /// its own metadata, timestamps and attributes — the Rust analogue
    /// of `DataBaseRef` (`original_source/src/lib_modules/core/
    /// database.hpp`). Used for zero-copy re-emission.
    pub fn reference(from: &Sample) -> Self {
        let shared_payload = match &from.payload {
            Payload::Owned(v) => Arc::new(v.clone()),
            Payload::Shared(v) => Arc::clone(v),
        };
        Self {
            payload: Payload::Shared(shared_payload),
            metadata: from.metadata.clone(),
            presentation_time: from.presentation_time,
            decoding_time: from.decoding_time,
            cue_flags: from.cue_flags,
            attributes: HashMap::new(),
        }
    }

    /// Clones this sample so its attribute map and payload pointer
    /// (never its bytes) are copied; used by the Rectifier to emit a
    /// re-timestamped copy of the chosen master frame.
    pub fn clone_for_reemission(&self) -> Self {
        let mut s = Sample::reference(self);
        s.copy_attributes_from(self);
        s
    }

    pub fn is_recyclable(&self) -> bool {
        self.payload.is_recyclable()
    }

    pub fn data(&self) -> &[u8] {
        self.payload.as_slice()
    }

    /// Mutable access, only valid for recyclable (owned) samples — the
    /// original's `DataBaseRef::data()` (non-const) unconditionally
    /// throws; here it is a typed `Result`.
    pub fn data_mut(&mut self) -> Result<&mut [u8], SampleError> {
        match &mut self.payload {
            Payload::Owned(v) => Ok(v.as_mut_slice()),
            Payload::Shared(_) => Err(SampleError::NotRecyclable),
        }
    }

    pub fn resize(&mut self, new_len: usize) -> Result<(), SampleError> {
        match &mut self.payload {
            Payload::Owned(v) => {
                v.resize(new_len, 0);
                Ok(())
            }
            Payload::Shared(_) => Err(SampleError::NotRecyclable),
        }
    }

    pub fn metadata(&self) -> Option<&Arc<Metadata>> {
        self.metadata.as_ref()
    }

    /// Sets metadata exactly once, as required by spec.md §3
    /// ("Metadata is set at most once per sample by the producer before
    /// posting").
    pub fn set_metadata(&mut self, metadata: Arc<Metadata>) -> Result<(), SampleError> {
        if self.metadata.is_some() {
            return Err(SampleError::MetadataAlreadySet);
        }
        self.metadata = Some(metadata);
        Ok(())
    }

    pub fn presentation_time(&self) -> i64 {
        self.presentation_time
    }

    pub fn set_presentation_time(&mut self, time: i64) {
        self.presentation_time = time;
    }

    pub fn decoding_time(&self) -> i64 {
        self.decoding_time
    }

    pub fn set_decoding_time(&mut self, time: i64) {
        self.decoding_time = time;
    }

    pub fn cue_flags(&self) -> CueFlags {
        self.cue_flags
    }

    pub fn set_cue_flags(&mut self, flags: CueFlags) {
        self.cue_flags = flags;
    }

    /// Sets an attribute exactly once (spec.md §3: "An attribute set on
    /// a sample is never overwritten").
    pub fn set_attribute(&mut self, key: AttributeKey, value: Vec<u8>) -> Result<(), SampleError> {
        if self.attributes.contains_key(&key) {
            return Err(SampleError::AttributeAlreadySet(key));
        }
        self.attributes.insert(key, value);
        Ok(())
    }

    pub fn get_attribute(&self, key: AttributeKey) -> Result<&[u8], SampleError> {
        self.attributes
            .get(&key)
            .map(|v| v.as_slice())
            .ok_or(SampleError::AttributeMissing(key))
    }

    /// Copies another sample's attribute map into this one. Per spec.md
    /// §3 ("cloning copies the attribute map"), existing entries here
    /// are overwritten wholesale by the copy, not merged key-by-key —
    /// this is a full replace, used right after construction.
    pub fn copy_attributes_from(&mut self, from: &Sample) {
        self.attributes = from.attributes.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::metadata::{Metadata, SubtitleMetadata};

    fn meta() -> Arc<Metadata> {
        Metadata::Subtitle(SubtitleMetadata {
            codec: "webvtt".into(),
        })
        .shared()
    }

    #[test]
    fn metadata_can_only_be_set_once() {
        let mut s = Sample::raw(vec![1, 2, 3]);
        assert!(s.set_metadata(meta()).is_ok());
        assert_eq!(s.set_metadata(meta()).unwrap_err(), SampleError::MetadataAlreadySet);
    }

    #[test]
    fn attribute_set_twice_fails_and_missing_attribute_fails() {
        let mut s = Sample::raw(vec![]);
        s.set_attribute(AttributeKey::CueFlags, vec![1]).unwrap();
        assert_eq!(
            s.set_attribute(AttributeKey::CueFlags, vec![2]).unwrap_err(),
            SampleError::AttributeAlreadySet(AttributeKey::CueFlags)
        );
        assert_eq!(s.get_attribute(AttributeKey::CueFlags).unwrap(), &[1]);
        assert_eq!(
            s.get_attribute(AttributeKey::DecodingTime).unwrap_err(),
            SampleError::AttributeMissing(AttributeKey::DecodingTime)
        );
    }

    #[test]
    fn referenced_sample_is_not_recyclable_and_rejects_writes() {
        let raw = Sample::raw(vec![9, 9, 9]);
        let mut reference = Sample::reference(&raw);
        assert!(!reference.is_recyclable());
        assert_eq!(reference.data(), &[9, 9, 9]);
        assert_eq!(reference.data_mut().unwrap_err(), SampleError::NotRecyclable);
    }

    #[test]
    fn raw_sample_is_recyclable_and_mutable() {
        let mut raw = Sample::raw(vec![0, 0]);
        raw.data_mut().unwrap()[0] = 42;
        assert_eq!(raw.data(), &[42, 0]);
    }

    #[test]
    fn clone_for_reemission_copies_attributes_but_shares_payload() {
        let mut raw = Sample::raw(vec![1, 2, 3]);
        raw.set_attribute(AttributeKey::PresentationTime, vec![7]).unwrap();

        let copy = raw.clone_for_reemission();
        assert_eq!(copy.data(), raw.data());
        assert_eq!(copy.get_attribute(AttributeKey::PresentationTime).unwrap(), &[7]);
    }
}
