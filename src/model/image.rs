use serde::{Deserialize, Serialize};

/// One layer of a container image, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// Uncompressed content address, e.g. `sha256:...`. Empty for layers
    /// that add no files.
    pub diff_id: String,
    #[serde(default)]
    pub command: String,
    /// Index into the image's base image list; 0 is the scanned image itself.
    #[serde(default)]
    pub base_image_index: usize,
}

impl LayerMetadata {
    pub fn new(diff_id: impl Into<String>) -> Self {
        Self {
            diff_id: diff_id.into(),
            ..Default::default()
        }
    }
}

/// A published image known to contain a layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseImageDetails {
    pub name: String,
}

impl BaseImageDetails {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Where in the image a package was introduced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDetails {
    pub diff_id: String,
    pub base_image_index: usize,
}

impl LayerDetails {
    pub fn new(diff_id: impl Into<String>) -> Self {
        Self {
            diff_id: diff_id.into(),
            base_image_index: 0,
        }
    }

    /// Packages from the scanned image's own layers are application
    /// packages, everything else came with a base image.
    pub fn is_from_base_image(&self) -> bool {
        self.base_image_index > 0
    }
}
