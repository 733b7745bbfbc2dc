use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{BatchLookup, MatcherConfig, ResilientBatchMatcher, DEPS_DEV_API};
use crate::error::{RemoteError, ScanError};
use crate::model::{BaseImageDetails, LayerMetadata, ScanResults};

/// Attributes container layers to known base images via deps.dev.
pub type BaseImageMatcher = ResilientBatchMatcher<DepsDevBaseImageLookup>;

/// Looks up which published images contain a layer chain.
///
/// Items are chain ids as produced by [`chain_ids`]. An empty chain id is a
/// layer without content and never matches.
pub struct DepsDevBaseImageLookup {
    client: reqwest::Client,
    base_url: String,
}

impl DepsDevBaseImageLookup {
    pub fn new(config: &MatcherConfig) -> Result<Self, ScanError> {
        Ok(Self {
            client: config.http_client()?,
            base_url: DEPS_DEV_API.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn query_url(&self, chain_id: &str) -> String {
        format!("{}/v3alpha/querycontainerimages/{}", self.base_url, chain_id)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ContainerImagesResponse {
    #[serde(default)]
    results: Vec<ContainerImage>,
}

#[derive(Debug, Deserialize)]
struct ContainerImage {
    repository: String,
}

/// Repository names from a deps.dev response, deduplicated in order.
fn parse_response(body: &str) -> Result<Vec<BaseImageDetails>, RemoteError> {
    let response: ContainerImagesResponse = serde_json::from_str(body)
        .map_err(|e| RemoteError::Permanent(format!("invalid container image response: {e}")))?;

    let mut images: Vec<BaseImageDetails> = Vec::new();
    for image in response.results {
        if image.repository.is_empty() || images.iter().any(|i| i.name == image.repository) {
            continue;
        }
        images.push(BaseImageDetails::new(image.repository));
    }
    Ok(images)
}

#[async_trait]
impl BatchLookup for DepsDevBaseImageLookup {
    type Item = String;
    type Output = Vec<BaseImageDetails>;

    fn name(&self) -> &'static str {
        "base image matcher"
    }

    async fn lookup(&self, chain_id: &String) -> Result<Vec<BaseImageDetails>, RemoteError> {
        if chain_id.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.client.get(self.query_url(chain_id)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), "container image query"));
        }

        let body = response.text().await?;
        let images = parse_response(&body)?;
        debug!("Layer chain {} found in {} image(s)", chain_id, images.len());
        Ok(images)
    }
}

impl<L> ResilientBatchMatcher<L>
where
    L: BatchLookup<Item = String, Output = Vec<BaseImageDetails>>,
{
    /// Looks up every layer and attributes it to a base image.
    ///
    /// Returns the image's base image list; see [`attribute_layers`].
    pub async fn match_layers(&self, layers: &mut [LayerMetadata]) -> Vec<Vec<BaseImageDetails>> {
        let chains = chain_ids(layers);
        let per_layer = self.match_batch(&chains).await.into_results();
        attribute_layers(layers, &per_layer)
    }
}

/// Cumulative chain ids, one per layer, innermost first.
///
/// The first content layer's chain id is its diff id; each following one is
/// `sha256:` followed by the hex SHA-256 of `"<previous chain id> <diff id>"`.
/// Layers with an empty diff id get an empty chain id and do not extend the
/// chain.
pub fn chain_ids(layers: &[LayerMetadata]) -> Vec<String> {
    let mut chain = String::new();
    layers
        .iter()
        .map(|layer| {
            if layer.diff_id.is_empty() {
                return String::new();
            }
            chain = if chain.is_empty() {
                layer.diff_id.clone()
            } else {
                let digest = Sha256::digest(format!("{} {}", chain, layer.diff_id).as_bytes());
                format!("sha256:{}", hex::encode(digest))
            };
            chain.clone()
        })
        .collect()
}

/// Assigns each layer the index of the base image it belongs to and returns
/// the base image list.
///
/// Entry 0 of the list is always empty and stands for the scanned image.
/// Walking from the outermost layer inwards, a layer whose matches differ
/// from the current base image opens a new one. Layers with the same matches
/// as the current base image, and layers without a match, stay in it.
pub fn attribute_layers(
    layers: &mut [LayerMetadata],
    per_layer: &[Vec<BaseImageDetails>],
) -> Vec<Vec<BaseImageDetails>> {
    let mut base_images: Vec<Vec<BaseImageDetails>> = vec![Vec::new()];
    let mut current = 0;

    for (i, layer) in layers.iter_mut().enumerate().rev() {
        let matches = per_layer.get(i).filter(|m| !m.is_empty());
        if let Some(matches) = matches.filter(|m| *m != &base_images[current]) {
            base_images.push(matches.clone());
            current = base_images.len() - 1;
        }
        layer.base_image_index = current;
    }

    base_images
}

/// Copies each layer's base image index onto the packages it introduced.
pub fn assign_package_layers(results: &mut ScanResults, layers: &[LayerMetadata]) {
    for result in &mut results.packages {
        let Some(details) = result.layer.as_mut() else {
            continue;
        };
        if let Some(layer) = layers.iter().find(|l| l.diff_id == details.diff_id) {
            details.base_image_index = layer.base_image_index;
        }
    }
}
