//! Typed view of a `GET /history/{prompt_id}` record.
//!
//! Only the parts the bridge needs are modelled: per-node output lists
//! of stored files. Key order from the response is preserved so
//! artifacts come back in the order ComfyUI reported them.

use comfybridge_core::media::ArtifactKind;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

/// Storage class assumed when a descriptor omits `type`.
pub const DEFAULT_STORAGE: &str = "output";

/// History entry for one prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryRecord {
    /// Node id -> files that node wrote.
    #[serde(default, deserialize_with = "null_as_default")]
    pub outputs: IndexMap<String, NodeOutputs>,
}

/// Files produced by a single node, grouped by class.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutputs {
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<ArtifactDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub videos: Vec<ArtifactDescriptor>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gifs: Vec<ArtifactDescriptor>,
}

/// Location of one stored file as reported in history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: Option<String>,
    #[serde(rename = "type")]
    pub storage: Option<String>,
    pub subfolder: Option<String>,
}

/// A descriptor resolved against defaults, ready to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRef<'a> {
    pub kind: ArtifactKind,
    pub filename: &'a str,
    pub storage: &'a str,
    pub subfolder: &'a str,
}

impl HistoryRecord {
    /// Every fetchable artifact in encounter order: nodes in record
    /// order, then images, videos and gifs, then list order.
    ///
    /// Descriptors without a filename are skipped.
    pub fn artifacts(&self) -> impl Iterator<Item = ArtifactRef<'_>> + '_ {
        self.outputs.values().flat_map(|node| {
            let images = node.images.iter().map(|d| (ArtifactKind::Image, d));
            let videos = node.videos.iter().map(|d| (ArtifactKind::Video, d));
            let gifs = node.gifs.iter().map(|d| (ArtifactKind::Gif, d));
            images.chain(videos).chain(gifs).filter_map(|(kind, d)| {
                let filename = d.filename.as_deref().filter(|f| !f.is_empty())?;
                Some(ArtifactRef {
                    kind,
                    filename,
                    storage: d.storage.as_deref().unwrap_or(DEFAULT_STORAGE),
                    subfolder: d.subfolder.as_deref().unwrap_or(""),
                })
            })
        })
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
