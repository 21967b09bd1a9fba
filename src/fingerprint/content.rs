use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::audio::AudioFingerprinter;
use super::compare::FingerprintComparator;
use super::hash::VideoFingerprinter;
use super::loader::{MediaHandle, MediaLoader, MediaPayload, SignalLoader};
use super::{Fingerprint, FingerprintSet, MediaType, SimilarityReport};
use crate::config::FingerprintConfig;
use crate::error::{Error, Result};

/// Fingerprints one media item and compares it against others.
///
/// A file is fingerprinted in its own modality only: a video's frames are
/// hashed, an audio file's samples are analysed. The fingerprint is
/// recomputed on every call.
pub struct ContentFingerprint<L: SignalLoader = MediaLoader> {
    handle: MediaHandle,
    loader: L,
    config: FingerprintConfig,
}

impl ContentFingerprint<MediaLoader> {
    pub fn open<P: AsRef<Path>>(path: P, config: FingerprintConfig) -> Result<Self> {
        config.validate()?;
        let loader = MediaLoader::new(config.audio.sample_rate)?;
        Self::with_loader(path, loader, config)
    }
}

impl<L: SignalLoader> ContentFingerprint<L> {
    pub fn with_loader<P: AsRef<Path>>(
        path: P,
        loader: L,
        config: FingerprintConfig,
    ) -> Result<Self> {
        config.validate()?;
        let handle = MediaHandle::open(path, &loader)?;
        Ok(Self {
            handle,
            loader,
            config,
        })
    }

    pub fn media_type(&self) -> MediaType {
        self.handle.media_type()
    }

    pub fn handle(&self) -> &MediaHandle {
        &self.handle
    }

    #[instrument(skip(self), fields(file = ?self.handle.path(), media_type = %self.media_type()))]
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        match self.handle.payload() {
            MediaPayload::Audio(samples) => {
                let fingerprinter = AudioFingerprinter::new(self.config.audio.clone());
                Ok(Fingerprint::Audio(fingerprinter.fingerprint(samples)))
            }
            MediaPayload::Video(_) => {
                let fingerprinter = VideoFingerprinter::new(self.config.video.clone());
                let frames = self.loader.decode_video_frames(self.handle.path())?;
                Ok(Fingerprint::Video(fingerprinter.fingerprint(frames)?))
            }
        }
    }

    /// Score this item against the same modality of `other`.
    pub fn compare(&self, other: &FingerprintSet) -> Result<SimilarityReport> {
        let media_type = self.media_type();
        let theirs = other
            .get(media_type)
            .ok_or(Error::MissingFingerprint(media_type))?;
        self.compare_fingerprint(&theirs)
    }

    pub fn compare_fingerprint(&self, other: &Fingerprint) -> Result<SimilarityReport> {
        let ours = self.fingerprint()?;
        let similarity = FingerprintComparator::new(self.config.scoring.clone())
            .compare(&ours, other)?;
        let media_type = self.media_type();
        info!(%media_type, similarity, "Compared fingerprints");
        Ok(SimilarityReport::for_modality(media_type, similarity))
    }

    /// Decoded frames of a video source, in order. Every frame counts as a
    /// keyframe.
    pub fn extract_keyframes(&self) -> Result<L::Frames> {
        if self.media_type() != MediaType::Video {
            return Err(Error::NotVideo);
        }
        self.loader.decode_video_frames(self.handle.path())
    }

    /// Write every frame to `dir` as `frame_<index>.<ext>`.
    pub fn save_keyframes<P: AsRef<Path>>(&self, dir: P, ext: &str) -> Result<Vec<PathBuf>> {
        let frames = self.extract_keyframes()?;
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let mut written = Vec::new();
        for (index, frame) in frames.enumerate() {
            let path = dir.join(format!("frame_{index}.{ext}"));
            frame?.save(&path)?;
            written.push(path);
        }
        debug!(count = written.len(), dir = ?dir, "Saved keyframes");
        Ok(written)
    }
}
