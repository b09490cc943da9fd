//! Partition planning and adaptive splitting

use crate::catalog::{Facet, Partition, SplitStage, StallReason, TaxonomyNode};
use crate::config::SplitConfig;
use crate::crawler::FacetSource;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of splitting a stalled partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitOutcome {
    /// Partitions to enqueue in place of the stalled one
    pub children: Vec<Partition>,
    /// True when no finer facet was available and the partition is accepted as incomplete
    pub lossy: bool,
}

/// Produces the initial work queue and refines partitions that stall
///
/// Escalation order for a stalled partition:
/// 1. reruns under each alternate sales channel (same escalation level)
/// 2. one child per brand reported by the facet source
/// 3. one child per fulltext token
/// 4. one child per price bucket
///
/// A partition already `max_escalation_depth` levels below its root is never
/// split further.
pub struct PartitionPlanner {
    facets: Option<Arc<dyn FacetSource>>,
    split: SplitConfig,
    max_escalation_depth: u8,
}

impl PartitionPlanner {
    pub fn new(split: SplitConfig, max_escalation_depth: u8) -> Self {
        Self {
            facets: None,
            split,
            max_escalation_depth,
        }
    }

    /// Enables brand splitting through a facet source
    pub fn with_facet_source(mut self, facets: Arc<dyn FacetSource>) -> Self {
        self.facets = Some(facets);
        self
    }

    /// Flattens a category tree into one root partition per distinct leaf path
    ///
    /// Leaves are returned in depth-first order of the tree.
    pub fn initial_partitions(&self, taxonomy: &[TaxonomyNode]) -> Vec<Partition> {
        let mut partitions = Vec::new();
        let mut seen_paths = HashSet::new();
        let mut stack: Vec<&TaxonomyNode> = taxonomy.iter().rev().collect();

        while let Some(node) = stack.pop() {
            if node.is_leaf() {
                if !node.path.is_empty() && seen_paths.insert(node.path.clone()) {
                    partitions.push(Partition::root(node.path.clone()));
                }
            } else {
                stack.extend(node.children.iter().rev());
            }
        }

        info!(
            "Planned {} leaf partitions from {} top-level categories",
            partitions.len(),
            taxonomy.len()
        );
        partitions
    }

    /// Splits a stalled partition into finer ones
    ///
    /// # Arguments
    ///
    /// * `partition` - The partition the fetcher reported as stalled
    /// * `reason` - How the stall was detected
    ///
    /// # Returns
    ///
    /// The replacement partitions, and whether the partition had to be
    /// accepted as lossy
    pub async fn split(&self, partition: &Partition, reason: StallReason) -> SplitOutcome {
        let mut outcome = SplitOutcome::default();

        if partition.stage == SplitStage::SalesChannel {
            outcome.children.extend(
                self.split
                    .sales_channels
                    .iter()
                    .skip(1)
                    .map(|channel| partition.rerun(channel)),
            );
        }

        if partition.level >= self.max_escalation_depth {
            warn!(
                "Partition {} stalled ({}) at escalation level {}; accepting as lossy",
                partition, reason, partition.level
            );
            outcome.lossy = true;
            return outcome;
        }

        let mut stage = partition.stage.max(SplitStage::Brand);
        loop {
            let facets = match stage {
                SplitStage::SalesChannel => None,
                SplitStage::Brand => self.brand_facets(partition).await,
                SplitStage::Token => Some(
                    self.split
                        .tokens
                        .iter()
                        .map(|t| Facet::Token(t.clone()))
                        .collect(),
                ),
                SplitStage::PriceRange => Some(
                    self.split
                        .price_ranges
                        .iter()
                        .map(|[low, high]| Facet::PriceRange {
                            low: *low,
                            high: *high,
                        })
                        .collect(),
                ),
                SplitStage::Exhausted => {
                    warn!(
                        "Partition {} stalled ({}) with every facet family exhausted; accepting as lossy",
                        partition, reason
                    );
                    outcome.lossy = true;
                    return outcome;
                }
            };

            match facets {
                Some(facets) if !facets.is_empty() => {
                    let next = stage.next();
                    info!(
                        "Splitting {} ({}) into {} partitions by {:?}",
                        partition,
                        reason,
                        facets.len(),
                        stage
                    );
                    outcome
                        .children
                        .extend(facets.into_iter().map(|f| partition.child(f, next)));
                    return outcome;
                }
                _ => stage = stage.next(),
            }
        }
    }

    /// Brand facets for a partition, or `None` when brand splitting cannot help
    async fn brand_facets(&self, partition: &Partition) -> Option<Vec<Facet>> {
        let source = self.facets.as_ref()?;

        match source.brands(partition).await {
            Ok(values) => {
                let brands: Vec<Facet> = values
                    .into_iter()
                    .filter(|v| v.count != Some(0) && !v.value.trim().is_empty())
                    .map(|v| Facet::Brand(v.value))
                    .collect();

                // a single brand selects the same entries as no brand filter
                if brands.len() > 1 {
                    Some(brands)
                } else {
                    debug!("Only {} brand(s) under {}; skipping brand split", brands.len(), partition);
                    None
                }
            }
            Err(e) => {
                warn!("Brand facets unavailable for {}: {}", partition, e);
                None
            }
        }
    }
}
