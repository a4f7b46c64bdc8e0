use std::path::Path;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TONE_PACKAGE: &str = "com.anonymous.echoalarm";
pub const BUNDLED_TONE_SCHEME: &str = "platform-resource://";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tone {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub is_default: bool,
}

/// Where a tone's uri points. Uris stay opaque strings; this is only used for display.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ToneSource {
    Bundled,
    ContentPicker,
    LocalFile,
    Other,
}

impl Tone {
    pub fn bundled(id: &str, name: &str, resource: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            uri: format!("{BUNDLED_TONE_SCHEME}{DEFAULT_TONE_PACKAGE}/raw/{resource}"),
            is_default: true,
        }
    }

    pub fn custom(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            uri: uri.into(),
            is_default: false,
        }
    }

    pub fn from_picked_file(path: &Path) -> Self {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| absolute.display().to_string());
        Self::custom(name, format!("file://{}", absolute.display()))
    }

    pub fn source(&self) -> ToneSource {
        let uri = self.uri.as_str();
        if uri.starts_with(BUNDLED_TONE_SCHEME) {
            ToneSource::Bundled
        } else if uri.starts_with("content://") {
            ToneSource::ContentPicker
        } else if uri.starts_with("file://") || uri.starts_with('/') {
            ToneSource::LocalFile
        } else {
            ToneSource::Other
        }
    }
}

pub fn default_tones() -> Vec<Tone> {
    vec![
        Tone::bundled("default_1", "Bossfight Starship", "bossfight_starship"),
        Tone::bundled("default_2", "Losing Game", "losing_game"),
        Tone::bundled("default_3", "Mateo", "mateo"),
    ]
}

/// Ordered tone collection used for rotation. Insertion order is rotation order and
/// uris are unique within a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TonePool {
    tones: Vec<Tone>,
}

impl TonePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a pool keeping the first tone for each uri.
    pub fn from_tones(tones: impl IntoIterator<Item = Tone>) -> Self {
        let mut pool = Self::new();
        pool.add_custom_tones(tones);
        pool
    }

    pub fn tones(&self) -> &[Tone] {
        &self.tones
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tone> {
        self.tones.iter()
    }

    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        self.tones.iter().any(|tone| tone.uri == uri)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.tones
            .iter()
            .any(|tone| tone.id.as_deref() == Some(id))
    }

    /// Tone rotated onto occurrence `index`, or `None` for an empty pool.
    pub fn tone_for_occurrence(&self, index: u32) -> Option<&Tone> {
        if self.tones.is_empty() {
            return None;
        }
        let slot = index as usize % self.tones.len();
        self.tones.get(slot)
    }

    /// Appends selected default tones in input order, skipping any whose id or uri
    /// is already pooled.
    pub fn add_default_tones(&mut self, selected: impl IntoIterator<Item = Tone>) -> usize {
        let mut added = 0;
        for tone in selected {
            let id_taken = tone
                .id
                .as_deref()
                .map(|id| self.contains_id(id))
                .unwrap_or(false);
            if id_taken || self.contains_uri(&tone.uri) {
                continue;
            }
            self.tones.push(tone);
            added += 1;
        }
        added
    }

    pub fn add_custom_tones(&mut self, selected: impl IntoIterator<Item = Tone>) -> usize {
        let mut added = 0;
        for tone in selected {
            if self.contains_uri(&tone.uri) {
                continue;
            }
            self.tones.push(tone);
            added += 1;
        }
        added
    }

    pub fn remove_tone(&mut self, uri: &str) -> Option<Tone> {
        let position = self.tones.iter().position(|tone| tone.uri == uri)?;
        Some(self.tones.remove(position))
    }

    /// Defaults the user may still pick: every entry of `all_defaults` whose id is
    /// not in the pool.
    pub fn available_default_tones(&self, all_defaults: &[Tone]) -> Vec<Tone> {
        all_defaults
            .iter()
            .filter(|tone| match tone.id.as_deref() {
                Some(id) => !self.contains_id(id),
                None => !self.contains_uri(&tone.uri),
            })
            .cloned()
            .collect()
    }
}

impl<'a> IntoIterator for &'a TonePool {
    type Item = &'a Tone;
    type IntoIter = std::slice::Iter<'a, Tone>;

    fn into_iter(self) -> Self::IntoIter {
        self.tones.iter()
    }
}
