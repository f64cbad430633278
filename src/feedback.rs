use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::FeedbackError;

/// A voice and the recorded clips available for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub name: String,
    pub clips: Vec<PathBuf>,
}

/// The clip chosen for one feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub voice: String,
    pub clip: PathBuf,
}

/// Picks a voice with at least one clip, then a random clip of it.
pub struct FeedbackSelector {
    voices: Vec<Voice>,
}

impl FeedbackSelector {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self { voices }
    }

    /// Build from `audio_dir/<voice>/` for each configured voice name.
    /// A voice whose directory is missing simply has no clips.
    pub fn scan(audio_dir: &Path, names: &[String]) -> Self {
        let voices = names
            .iter()
            .map(|name| Voice {
                name: name.clone(),
                clips: list_clips(&audio_dir.join(name)),
            })
            .collect();
        let selector = Self::new(voices);
        debug!(
            dir = %audio_dir.display(),
            playable = selector.playable_voices().count(),
            "voice library scanned"
        );
        selector
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn playable_voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter().filter(|v| !v.clips.is_empty())
    }

    /// Select a clip for `requested`, or for a random voice when `None`.
    ///
    /// If the requested voice is unknown or has no clips another voice with
    /// clips is drawn instead. Fails only when no voice has any clip.
    pub fn select<R: Rng + ?Sized>(
        &self,
        requested: Option<&str>,
        rng: &mut R,
    ) -> Result<Selection, FeedbackError> {
        let preferred = requested
            .and_then(|name| self.voices.iter().find(|v| v.name == name))
            .filter(|v| !v.clips.is_empty());

        let voice = match preferred {
            Some(voice) => voice,
            None => {
                if let Some(name) = requested {
                    warn!(voice = name, "requested voice has no clips, picking another");
                }
                let candidates: Vec<&Voice> = self
                    .playable_voices()
                    .filter(|v| Some(v.name.as_str()) != requested)
                    .collect();
                *candidates
                    .choose(rng)
                    .ok_or(FeedbackError::NoPlayableContent)?
            }
        };

        let clip = voice
            .clips
            .choose(rng)
            .ok_or(FeedbackError::NoPlayableContent)?;
        Ok(Selection {
            voice: voice.name.clone(),
            clip: clip.clone(),
        })
    }
}

fn list_clips(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list voice clips");
            return Vec::new();
        }
    };

    let mut clips: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    clips.sort();
    clips
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn voice(name: &str, clips: &[&str]) -> Voice {
        Voice {
            name: name.into(),
            clips: clips.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn requested_voice_with_clips_is_used() {
        let selector = FeedbackSelector::new(vec![
            voice("Papa", &["papa/1.m4a"]),
            voice("Maman", &["maman/1.m4a", "maman/2.m4a"]),
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let sel = selector.select(Some("Maman"), &mut rng).unwrap();
            assert_eq!(sel.voice, "Maman");
            assert!(sel.clip.starts_with("maman"));
        }
    }

    #[test]
    fn empty_voices_are_never_selected() {
        let selector = FeedbackSelector::new(vec![
            voice("Papa", &[]),
            voice("Maman", &[]),
            voice("Oscar", &["oscar/1.m4a"]),
            voice("Augustine", &[]),
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(selector.select(None, &mut rng).unwrap().voice, "Oscar");
            assert_eq!(selector.select(Some("Papa"), &mut rng).unwrap().voice, "Oscar");
            assert_eq!(selector.select(Some("Nobody"), &mut rng).unwrap().voice, "Oscar");
        }
    }

    #[test]
    fn no_clips_anywhere_is_an_error() {
        let selector = FeedbackSelector::new(vec![voice("Papa", &[]), voice("Maman", &[])]);
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            selector.select(None, &mut rng),
            Err(FeedbackError::NoPlayableContent)
        );
        assert_eq!(
            selector.select(Some("Papa"), &mut rng),
            Err(FeedbackError::NoPlayableContent)
        );
        assert_eq!(
            FeedbackSelector::new(Vec::new()).select(None, &mut rng),
            Err(FeedbackError::NoPlayableContent)
        );
    }

    #[test]
    fn random_selection_covers_playable_voices() {
        let selector = FeedbackSelector::new(vec![
            voice("Papa", &["p.m4a"]),
            voice("Maman", &["m.m4a"]),
            voice("Oscar", &[]),
        ]);
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            seen.insert(selector.select(None, &mut rng).unwrap().voice);
        }
        assert_eq!(seen.len(), 2);
        assert!(!seen.contains("Oscar"));
    }

    #[test]
    fn scan_reads_voice_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Papa")).unwrap();
        fs::write(dir.path().join("Papa/b.m4a"), b"x").unwrap();
        fs::write(dir.path().join("Papa/a.m4a"), b"x").unwrap();
        fs::write(dir.path().join("Papa/.DS_Store"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("Maman")).unwrap();

        let names = vec!["Papa".to_string(), "Maman".to_string(), "Oscar".to_string()];
        let selector = FeedbackSelector::scan(dir.path(), &names);
        let voices = selector.voices();
        assert_eq!(voices.len(), 3);
        assert_eq!(
            voices[0].clips,
            vec![dir.path().join("Papa/a.m4a"), dir.path().join("Papa/b.m4a")]
        );
        assert!(voices[1].clips.is_empty());
        assert!(voices[2].clips.is_empty());
        assert_eq!(selector.playable_voices().count(), 1);
    }
}
