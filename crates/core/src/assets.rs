use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use meloskia_project::SongAsset;
use meloskia_transport::AudioArc;
use rayon::prelude::*;

/// Source of decoded audio for asset notes and clicks.
pub trait AssetProvider {
    /// `None` while the asset is not (yet) available.
    fn get_asset(&self, id: &str) -> Option<AudioArc>;

    fn is_loading(&self) -> bool;
}

impl<T: AssetProvider + ?Sized> AssetProvider for &T {
    fn get_asset(&self, id: &str) -> Option<AudioArc> {
        (**self).get_asset(id)
    }

    fn is_loading(&self) -> bool {
        (**self).is_loading()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load asset '{id}' from {path}: {source}")]
pub struct AssetError {
    pub id: String,
    pub path: PathBuf,
    pub source: anyhow::Error,
}

type LoadResult = (String, Result<AudioArc, AssetError>);

/// Decoded assets, resampled to one host rate.
#[derive(Default)]
pub struct AssetLibrary {
    ready: HashMap<String, AudioArc>,
    failed: Vec<AssetError>,
    pending: Option<(mpsc::Receiver<LoadResult>, usize)>,
}

fn load_one(asset: &SongAsset, base: Option<&Path>, sample_rate: u32) -> LoadResult {
    let result = meloskia_decode::load_asset(&asset.path, base, sample_rate).map_err(|source| {
        AssetError {
            id: asset.id.clone(),
            path: asset.path.clone(),
            source,
        }
    });
    (asset.id.clone(), result)
}

impl AssetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every asset now, in parallel.
    pub fn load(assets: &[SongAsset], base: Option<&Path>, sample_rate: u32) -> Self {
        let results: Vec<LoadResult> = assets
            .par_iter()
            .map(|asset| load_one(asset, base, sample_rate))
            .collect();

        let mut library = Self::new();
        for result in results {
            library.accept(result);
        }
        tracing::info!(
            ready = library.ready.len(),
            failed = library.failed.len(),
            "assets loaded"
        );
        library
    }

    /// Decode on the rayon pool; `is_loading` stays true until [`poll`]
    /// has received every result.
    ///
    /// [`poll`]: AssetLibrary::poll
    pub fn load_in_background(assets: Vec<SongAsset>, base: Option<PathBuf>, sample_rate: u32) -> Self {
        let (tx, rx) = mpsc::channel();
        let expected = assets.len();

        rayon::spawn(move || {
            assets.par_iter().for_each_with(tx, |tx, asset| {
                let _ = tx.send(load_one(asset, base.as_deref(), sample_rate));
            });
        });

        Self {
            pending: (expected > 0).then_some((rx, expected)),
            ..Self::default()
        }
    }

    /// Collect finished background loads.
    pub fn poll(&mut self) {
        let Some((rx, remaining)) = self.pending.as_mut() else {
            return;
        };

        let mut received = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(result) => {
                    received.push(result);
                    *remaining -= 1;
                    if *remaining == 0 {
                        break;
                    }
                }
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => {
                    *remaining = 0;
                    break;
                }
            }
        }

        let done = *remaining == 0;
        for result in received {
            self.accept(result);
        }
        if done {
            self.pending = None;
            tracing::info!(
                ready = self.ready.len(),
                failed = self.failed.len(),
                "background asset loading finished"
            );
        }
    }

    /// Block until background loading is over.
    pub fn wait(&mut self) {
        while self.is_loading() {
            let Some((rx, _)) = self.pending.as_ref() else {
                break;
            };
            match rx.recv() {
                Ok(result) => {
                    self.accept(result);
                    if let Some((_, remaining)) = self.pending.as_mut() {
                        *remaining -= 1;
                        if *remaining == 0 {
                            self.pending = None;
                        }
                    }
                }
                Err(_) => self.pending = None,
            }
        }
    }

    fn accept(&mut self, (id, result): LoadResult) {
        match result {
            Ok(audio) => {
                tracing::debug!(id = %id, duration = audio.duration_secs(), "asset ready");
                self.ready.insert(id, audio);
            }
            Err(err) => {
                tracing::warn!("{err}");
                self.failed.push(err);
            }
        }
    }

    pub fn insert(&mut self, id: impl Into<String>, audio: AudioArc) {
        self.ready.insert(id.into(), audio);
    }

    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    pub fn failures(&self) -> &[AssetError] {
        &self.failed
    }
}

impl AssetProvider for AssetLibrary {
    fn get_asset(&self, id: &str) -> Option<AudioArc> {
        self.ready.get(id).cloned()
    }

    fn is_loading(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meloskia_project::AssetKind;

    #[test]
    fn test_insert_and_get() {
        let mut library = AssetLibrary::new();
        assert!(library.get_asset("click").is_none());
        library.insert("click", AudioArc::new(vec![1.0; 10], 48000, 1));
        assert_eq!(library.get_asset("click").map(|a| a.frames()), Some(10));
        assert!(!library.is_loading());
    }

    #[test]
    fn test_missing_files_are_recorded_not_fatal() {
        let assets = vec![SongAsset::new(
            "ghost",
            "Ghost",
            "/nonexistent/ghost.wav",
            AssetKind::Note,
        )];
        let library = AssetLibrary::load(&assets, None, 48000);
        assert!(library.is_empty());
        assert_eq!(library.failures().len(), 1);
        assert_eq!(library.failures()[0].id, "ghost");
    }

    #[test]
    fn test_background_loading_finishes() {
        let assets = vec![
            SongAsset::new("a", "A", "/nonexistent/a.wav", AssetKind::Note),
            SongAsset::new("b", "B", "/nonexistent/b.wav", AssetKind::Note),
        ];
        let mut library = AssetLibrary::load_in_background(assets, None, 48000);
        assert!(library.is_loading());

        library.wait();
        assert!(!library.is_loading());
        assert_eq!(library.failures().len(), 2);
    }

    #[test]
    fn test_background_loading_of_nothing_is_done() {
        let library = AssetLibrary::load_in_background(Vec::new(), None, 48000);
        assert!(!library.is_loading());
    }
}
