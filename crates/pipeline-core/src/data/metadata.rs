//! Immutable stream metadata, shared and set at most once per sample's
//! producer.
//!
//! Grounded on `original_source/src/lib_modules/core/database.hpp`'s
//! `IMetadata`/`getMetadata`/`setMetadata` and the media-kind enum used
//! throughout `rectifier.cpp` (`VIDEO_RAW`, `AUDIO_RAW`, `SUBTITLE_RAW`).

use std::sync::Arc;

/// The kind of media a [`Metadata`] describes. Declared ports compare
/// this at connect time (spec.md §4.F "compatibility check").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub codec: String,
    pub codec_private_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: crate::fraction::Fraction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMetadata {
    pub codec: String,
    pub codec_private_data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleMetadata {
    pub codec: String,
}

/// Describes the stream a sample belongs to. Immutable once constructed
/// and shared (`Arc`) across every sample of that stream, per spec.md §3
/// ("Metadata handle: shared, immutable").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Video(VideoMetadata),
    Audio(AudioMetadata),
    Subtitle(SubtitleMetadata),
}

impl Metadata {
    pub fn kind(&self) -> MediaKind {
        match self {
            Metadata::Video(_) => MediaKind::Video,
            Metadata::Audio(_) => MediaKind::Audio,
            Metadata::Subtitle(_) => MediaKind::Subtitle,
        }
    }

    pub fn shared(self) -> Arc<Metadata> {
        Arc::new(self)
    }

    /// The Rust analogue of the original's `safe_cast<DataPcm>`-style
    /// downcast (`original_source/src/lib_modules/core/database.hpp`),
    /// narrowed to a closed enum instead of a dynamic cast.
    pub fn as_video(&self) -> Option<&VideoMetadata> {
        match self {
            Metadata::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioMetadata> {
        match self {
            Metadata::Audio(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_subtitle(&self) -> Option<&SubtitleMetadata> {
        match self {
            Metadata::Subtitle(s) => Some(s),
            _ => None,
        }
    }
}
