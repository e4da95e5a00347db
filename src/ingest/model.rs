//! DTOs returned by the downstream ingestion service's media endpoints.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFile {
    pub id: String,
    #[serde(rename = "publicUrl")]
    pub public_url: String,
    pub metadata: FileMetadata,
    #[serde(default)]
    pub location: StorageLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
    #[serde(rename = "mediaInfo", default)]
    pub media_info: Option<MediaInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageLocation {
    #[serde(rename = "containerName", default)]
    pub container_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    #[serde(default)]
    pub image: Option<ImageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resolution {
    pub horizontal: f64,
    pub vertical: f64,
}

/// Metadata attached to an asset upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMetadata {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub unique_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_file_parses_with_image_info() {
        let raw = r#"{
            "id": "file-1",
            "publicUrl": "https://cdn.example/file-1.jpg",
            "metadata": {
                "filename": "a.jpg", "mimeType": "image/jpeg", "size": 1024,
                "mediaInfo": {"image": {"width": 800, "height": 600,
                              "resolution": {"horizontal": 72.0, "vertical": 72.0}}}
            },
            "location": {"containerName": "media"}
        }"#;
        let file: MediaFile = serde_json::from_str(raw).unwrap();
        let image = file.metadata.media_info.unwrap().image.unwrap();
        assert_eq!(image.width, 800);
        assert_eq!(file.location.container_name, "media");
    }

    #[test]
    fn media_file_parses_without_media_info() {
        let raw = r#"{
            "id": "file-2",
            "publicUrl": "https://cdn.example/file-2.pdf",
            "metadata": {"filename": "b.pdf", "mimeType": "application/pdf", "size": 9}
        }"#;
        let file: MediaFile = serde_json::from_str(raw).unwrap();
        assert!(file.metadata.media_info.is_none());
    }
}
