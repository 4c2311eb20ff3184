//! Artifact kinds and MIME type inference.

use serde::{Deserialize, Serialize};

/// Class of an artifact produced by a workflow.
///
/// The wire name matches the history key it was listed under minus the
/// plural (`images` -> `image`, `gifs` -> `gif`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Video,
    /// Animated output (GIF, animated WebP) from video-combine style nodes.
    Gif,
}

impl ArtifactKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
            ArtifactKind::Gif => "gif",
        }
    }

    /// MIME type used when the filename extension is not recognised.
    pub fn default_mime(self) -> &'static str {
        match self {
            ArtifactKind::Image => "image/png",
            ArtifactKind::Video => "video/mp4",
            ArtifactKind::Gif => "image/gif",
        }
    }
}

/// Infer a MIME type for an artifact from its filename.
///
/// Only extensions that the given kind actually produces are
/// recognised; anything else falls back to [`ArtifactKind::default_mime`].
pub fn infer_mime(kind: ArtifactKind, filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match (kind, extension.as_str()) {
        (ArtifactKind::Image, "webp") => "image/webp",
        (ArtifactKind::Image, "jpg" | "jpeg") => "image/jpeg",
        (ArtifactKind::Video, "webm") => "video/webm",
        (kind, _) => kind.default_mime(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_image() {
        assert_eq!(infer_mime(ArtifactKind::Image, "out.png"), "image/png");
    }

    #[test]
    fn image_extensions_are_case_insensitive() {
        assert_eq!(infer_mime(ArtifactKind::Image, "OUT.WEBP"), "image/webp");
        assert_eq!(infer_mime(ArtifactKind::Image, "a.JPG"), "image/jpeg");
        assert_eq!(infer_mime(ArtifactKind::Image, "a.jpeg"), "image/jpeg");
    }

    #[test]
    fn unknown_image_extension_defaults_to_png() {
        assert_eq!(infer_mime(ArtifactKind::Image, "render.tiff"), "image/png");
        assert_eq!(infer_mime(ArtifactKind::Image, "no_extension"), "image/png");
    }

    #[test]
    fn video_extensions() {
        assert_eq!(infer_mime(ArtifactKind::Video, "clip.webm"), "video/webm");
        assert_eq!(infer_mime(ArtifactKind::Video, "clip.mp4"), "video/mp4");
        assert_eq!(infer_mime(ArtifactKind::Video, "clip.mov"), "video/mp4");
    }

    #[test]
    fn gif_kind_is_always_gif() {
        assert_eq!(infer_mime(ArtifactKind::Gif, "anim.gif"), "image/gif");
        assert_eq!(infer_mime(ArtifactKind::Gif, "anim.webp"), "image/gif");
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(serde_json::to_value(ArtifactKind::Gif).unwrap(), "gif");
        assert_eq!(ArtifactKind::Video.as_str(), "video");
    }
}
