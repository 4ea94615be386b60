//! Immutable latent spaces produced by the offline decomposition pipeline.
//!
//! A [`LatentSpace`] positions bills (via loadings) and members (via
//! precomputed vectors) in the same `dimensions`-dimensional space. Shapes are
//! checked once at construction so the numeric core can index freely.
//!
//! Bills and members keep the order in which they were supplied. Every
//! "first encountered" tie-break downstream follows that order.
//!
//! # Artifact format
//!
//! ```text
//! {
//!   "clusterId": 7,
//!   "nComponents": 3,
//!   "clusters": {
//!     "<label>": {
//!       "memberVectors": { "<member id>": [f64; dims], ... },
//!       "billIds": [id, ...],
//!       "billLoadings": [[f64; dims], ...],      // aligned with billIds
//!       "explainedVariance": [f64; dims],
//!       "dimensions": dims,
//!       "memberCount": n, "billCount": m
//!     }
//!   }
//! }
//! ```
//!
//! A label with `dimensions == 0` had too little data upstream and cannot be
//! opened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, SpaceError};

pub type SpaceId = String;
pub type BillId = String;
pub type MemberId = String;

// =============================================================================
// Latent space
// =============================================================================

/// One latent space: bill loadings, member vectors, explained variance.
#[derive(Debug, Clone)]
pub struct LatentSpace {
    space_id: SpaceId,
    dimensions: usize,
    bill_ids: Vec<BillId>,
    loadings: Vec<Vec<f64>>,
    /// Population variance of member projections, per bill.
    member_variance: Vec<f64>,
    bill_index: HashMap<BillId, usize>,
    member_ids: Vec<MemberId>,
    member_vectors: Vec<Vec<f64>>,
    explained_variance: Vec<f64>,
}

impl LatentSpace {
    /// Build a space, validating every vector against `dimensions`.
    pub fn new(
        space_id: impl Into<SpaceId>,
        dimensions: usize,
        bills: Vec<(BillId, Vec<f64>)>,
        members: Vec<(MemberId, Vec<f64>)>,
        explained_variance: Vec<f64>,
    ) -> std::result::Result<Self, SpaceError> {
        let space_id = space_id.into();
        if dimensions == 0 {
            return Err(SpaceError::ZeroDimensions { space_id });
        }
        if bills.is_empty() {
            return Err(SpaceError::NoBills { space_id });
        }
        if members.is_empty() {
            return Err(SpaceError::NoMembers { space_id });
        }
        check_length(&space_id, "explained variance", "-", &explained_variance, dimensions)?;

        let mut bill_ids = Vec::with_capacity(bills.len());
        let mut loadings = Vec::with_capacity(bills.len());
        let mut bill_index = HashMap::with_capacity(bills.len());
        for (bill_id, loading) in bills {
            check_length(&space_id, "bill", &bill_id, &loading, dimensions)?;
            if bill_index.insert(bill_id.clone(), bill_ids.len()).is_some() {
                return Err(SpaceError::DuplicateId {
                    space_id,
                    kind: "bill",
                    id: bill_id,
                });
            }
            bill_ids.push(bill_id);
            loadings.push(loading);
        }

        let mut member_ids = Vec::with_capacity(members.len());
        let mut member_vectors = Vec::with_capacity(members.len());
        let mut seen = HashSet::with_capacity(members.len());
        for (member_id, vector) in members {
            check_length(&space_id, "member", &member_id, &vector, dimensions)?;
            if !seen.insert(member_id.clone()) {
                return Err(SpaceError::DuplicateId {
                    space_id,
                    kind: "member",
                    id: member_id,
                });
            }
            member_ids.push(member_id);
            member_vectors.push(vector);
        }

        let member_variance = loadings
            .iter()
            .map(|loading| projection_variance(&member_vectors, loading))
            .collect();

        Ok(Self {
            space_id,
            dimensions,
            bill_ids,
            loadings,
            member_variance,
            bill_index,
            member_ids,
            member_vectors,
            explained_variance,
        })
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn bill_count(&self) -> usize {
        self.bill_ids.len()
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }

    pub fn contains_bill(&self, bill_id: &str) -> bool {
        self.bill_index.contains_key(bill_id)
    }

    /// Loading vector of a bill, if the bill belongs to this space.
    pub fn loading(&self, bill_id: &str) -> Option<&[f64]> {
        self.bill_index
            .get(bill_id)
            .map(|&i| self.loadings[i].as_slice())
    }

    /// Spread of member positions along a bill's loading direction.
    pub fn member_variance(&self, bill_id: &str) -> Option<f64> {
        self.bill_index.get(bill_id).map(|&i| self.member_variance[i])
    }

    /// Bills in artifact order: `(bill_id, loading, member_variance)`.
    pub fn bills(&self) -> impl Iterator<Item = (&str, &[f64], f64)> + '_ {
        self.bill_ids
            .iter()
            .zip(&self.loadings)
            .zip(&self.member_variance)
            .map(|((id, loading), &variance)| (id.as_str(), loading.as_slice(), variance))
    }

    /// Members in artifact order.
    pub fn members(&self) -> impl Iterator<Item = (&str, &[f64])> + '_ {
        self.member_ids
            .iter()
            .zip(&self.member_vectors)
            .map(|(id, vector)| (id.as_str(), vector.as_slice()))
    }

    pub fn member_vector(&self, member_id: &str) -> Option<&[f64]> {
        self.member_ids
            .iter()
            .position(|id| id == member_id)
            .map(|i| self.member_vectors[i].as_slice())
    }

    /// Join a bill with its (optional) metadata.
    pub fn bill_info(&self, bill_id: &str, metadata: Option<&BillMetadata>) -> Option<BillInfo> {
        let &i = self.bill_index.get(bill_id)?;
        let metadata = metadata.cloned().unwrap_or_default();
        Some(BillInfo {
            bill_id: bill_id.to_string(),
            title: metadata.title,
            description: metadata.description,
            outcome: metadata.outcome,
            loading: self.loadings[i].clone(),
            member_variance: self.member_variance[i],
        })
    }

    /// For each dimension, the `top_n` bills with the largest absolute loading.
    pub fn representative_bills(&self, top_n: usize) -> Vec<Vec<RepresentativeBill>> {
        (0..self.dimensions)
            .map(|dim| {
                let mut ranked: Vec<(usize, f64)> = self
                    .loadings
                    .iter()
                    .enumerate()
                    .map(|(i, loading)| (i, loading[dim]))
                    .collect();
                ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
                ranked
                    .into_iter()
                    .take(top_n)
                    .map(|(i, loading)| RepresentativeBill {
                        bill_id: self.bill_ids[i].clone(),
                        dimension: dim,
                        loading,
                    })
                    .collect()
            })
            .collect()
    }
}

fn check_length(
    space_id: &str,
    kind: &'static str,
    id: &str,
    values: &[f64],
    expected: usize,
) -> std::result::Result<(), SpaceError> {
    if values.len() != expected {
        return Err(SpaceError::VectorLength {
            space_id: space_id.to_string(),
            kind,
            id: id.to_string(),
            expected,
            actual: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SpaceError::NonFinite {
            space_id: space_id.to_string(),
        });
    }
    Ok(())
}

/// Population variance of `dot(member, loading)` across all members.
pub fn projection_variance(members: &[Vec<f64>], loading: &[f64]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let projections: Vec<f64> = members.iter().map(|m| dot(m, loading)).collect();
    let n = projections.len() as f64;
    let mean = projections.iter().sum::<f64>() / n;
    projections.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// =============================================================================
// Bill metadata
// =============================================================================

/// Whether the bill passed when it was voted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillOutcome {
    Passed,
    Failed,
    Unknown,
}

/// Descriptive bill fields, supplied alongside the artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub outcome: Option<BillOutcome>,
}

/// A bill joined with its position in one space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillInfo {
    pub bill_id: BillId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub outcome: Option<BillOutcome>,
    pub loading: Vec<f64>,
    pub member_variance: f64,
}

/// A bill that characterizes one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepresentativeBill {
    pub bill_id: BillId,
    pub dimension: usize,
    pub loading: f64,
}

// =============================================================================
// Providers
// =============================================================================

/// Source of latent spaces for sessions.
pub trait LatentSpaceProvider {
    /// Resolve a space by id.
    fn space(&self, space_id: &str) -> Result<Arc<LatentSpace>>;

    /// Descriptive metadata for a bill, when known.
    fn bill_metadata(&self, _bill_id: &str) -> Option<BillMetadata> {
        None
    }
}

impl<P: LatentSpaceProvider + ?Sized> LatentSpaceProvider for Arc<P> {
    fn space(&self, space_id: &str) -> Result<Arc<LatentSpace>> {
        (**self).space(space_id)
    }

    fn bill_metadata(&self, bill_id: &str) -> Option<BillMetadata> {
        (**self).bill_metadata(bill_id)
    }
}

/// Spaces and metadata held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemorySpaceProvider {
    spaces: HashMap<SpaceId, Arc<LatentSpace>>,
    metadata: HashMap<BillId, BillMetadata>,
}

impl InMemorySpaceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, space: LatentSpace) -> Arc<LatentSpace> {
        let space = Arc::new(space);
        self.spaces
            .insert(space.space_id().to_string(), Arc::clone(&space));
        space
    }

    pub fn insert_metadata(&mut self, bill_id: impl Into<BillId>, metadata: BillMetadata) {
        self.metadata.insert(bill_id.into(), metadata);
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}

impl LatentSpaceProvider for InMemorySpaceProvider {
    fn space(&self, space_id: &str) -> Result<Arc<LatentSpace>> {
        self.spaces
            .get(space_id)
            .cloned()
            .ok_or_else(|| Error::not_found("space", space_id))
    }

    fn bill_metadata(&self, bill_id: &str) -> Option<BillMetadata> {
        self.metadata.get(bill_id).cloned()
    }
}

// =============================================================================
// Artifact ingestion
// =============================================================================

/// Numeric or string identifier as written by the offline pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactId {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// One clustering run's latent spaces, keyed by cluster label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceArtifact {
    pub cluster_id: ArtifactId,
    pub n_components: usize,
    pub clusters: BTreeMap<String, ClusterArtifact>,
    #[serde(default)]
    pub bill_metadata: BTreeMap<String, BillMetadata>,
}

/// One cluster label's decomposition output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArtifact {
    #[serde(default)]
    pub member_vectors: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub bill_ids: Vec<ArtifactId>,
    #[serde(default)]
    pub bill_loadings: Vec<Vec<f64>>,
    #[serde(default)]
    pub explained_variance: Vec<f64>,
    pub dimensions: usize,
    #[serde(default)]
    pub member_count: usize,
    #[serde(default)]
    pub bill_count: usize,
}

/// Space id for a cluster label within a clustering run.
pub fn space_key(cluster_id: &impl std::fmt::Display, label: &str) -> SpaceId {
    format!("{cluster_id}:{label}")
}

impl SpaceArtifact {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Labels sorted numerically where possible.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.clusters.keys().map(String::as_str).collect();
        labels.sort_by_key(|label| (label.parse::<i64>().unwrap_or(i64::MAX), label.to_string()));
        labels
    }

    /// Build the latent space for one label.
    pub fn space(&self, label: &str) -> Result<LatentSpace> {
        let space_id = space_key(&self.cluster_id, label);
        let cluster = self
            .clusters
            .get(label)
            .ok_or_else(|| Error::not_found("cluster label", label))?;
        Ok(cluster.to_space(space_id)?)
    }
}

impl ClusterArtifact {
    fn to_space(&self, space_id: SpaceId) -> std::result::Result<LatentSpace, SpaceError> {
        if self.dimensions == 0 {
            return Err(SpaceError::ZeroDimensions { space_id });
        }
        if self.bill_ids.len() != self.bill_loadings.len() {
            return Err(SpaceError::MisalignedLoadings {
                space_id,
                bill_ids: self.bill_ids.len(),
                loadings: self.bill_loadings.len(),
            });
        }
        let bills = self
            .bill_ids
            .iter()
            .zip(&self.bill_loadings)
            .map(|(id, loading)| (id.to_string(), loading.clone()))
            .collect();
        let members = self
            .member_vectors
            .iter()
            .map(|(id, vector)| (id.clone(), vector.clone()))
            .collect();
        LatentSpace::new(
            space_id,
            self.dimensions,
            bills,
            members,
            self.explained_variance.clone(),
        )
    }
}

/// Provider over one artifact file. Every label is built up front, so shape
/// errors surface when the artifact is opened.
#[derive(Debug, Clone)]
pub struct ArtifactSpaceProvider {
    space_ids: Vec<SpaceId>,
    spaces: HashMap<SpaceId, Arc<LatentSpace>>,
    unusable: HashMap<SpaceId, SpaceError>,
    metadata: HashMap<BillId, BillMetadata>,
}

impl ArtifactSpaceProvider {
    pub fn from_artifact(artifact: &SpaceArtifact) -> Self {
        let mut space_ids = Vec::new();
        let mut spaces = HashMap::new();
        let mut unusable = HashMap::new();
        for label in artifact.labels() {
            let space_id = space_key(&artifact.cluster_id, label);
            space_ids.push(space_id.clone());
            match artifact.clusters[label].to_space(space_id.clone()) {
                Ok(space) => {
                    spaces.insert(space_id, Arc::new(space));
                }
                Err(err) => {
                    tracing::warn!(space_id = %space_id, error = %err, "Latent space unusable");
                    unusable.insert(space_id, err);
                }
            }
        }
        let metadata = artifact
            .bill_metadata
            .iter()
            .map(|(id, meta)| (id.clone(), meta.clone()))
            .collect();
        Self {
            space_ids,
            spaces,
            unusable,
            metadata,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let artifact = SpaceArtifact::load(path)?;
        Ok(Self::from_artifact(&artifact))
    }

    /// Every space id in the artifact, usable or not.
    pub fn space_ids(&self) -> &[SpaceId] {
        &self.space_ids
    }

    /// Space ids that can be opened.
    pub fn usable_space_ids(&self) -> Vec<SpaceId> {
        self.space_ids
            .iter()
            .filter(|id| self.spaces.contains_key(*id))
            .cloned()
            .collect()
    }
}

impl LatentSpaceProvider for ArtifactSpaceProvider {
    fn space(&self, space_id: &str) -> Result<Arc<LatentSpace>> {
        if let Some(space) = self.spaces.get(space_id) {
            return Ok(Arc::clone(space));
        }
        match self.unusable.get(space_id) {
            Some(err) => Err(Error::Configuration(err.clone())),
            None => Err(Error::not_found("space", space_id)),
        }
    }

    fn bill_metadata(&self, bill_id: &str) -> Option<BillMetadata> {
        self.metadata.get(bill_id).cloned()
    }
}
