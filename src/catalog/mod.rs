//! Catalog partitioning
//!
//! This module describes *what* gets crawled:
//! - [`TaxonomyNode`]: the store's category tree
//! - [`Partition`]: one independently enumerable slice of the catalog
//! - [`PartitionPlanner`]: turns the tree into partitions and splits
//!   partitions whose enumeration stalls

mod normalize;
mod planner;

pub use normalize::{normalize_url, resolve_listing_url};
pub use planner::{PartitionPlanner, SplitOutcome};

use std::fmt;

/// A node in the store's category tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyNode {
    /// Full path of URL segments from the root down to this node
    pub path: Vec<String>,
    pub name: String,
    pub children: Vec<TaxonomyNode>,
}

impl TaxonomyNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A filter applied on top of a category path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Facet {
    /// Sales channel / store view
    SalesChannel(String),
    /// Brand identifier as reported by the facet source
    Brand(String),
    /// Fulltext prefix token
    Token(String),
    /// Inclusive price bucket
    PriceRange { low: u64, high: u64 },
}

impl Facet {
    /// Query parameter this facet contributes to a listing request
    pub fn query_param(&self) -> (&'static str, String) {
        match self {
            Facet::SalesChannel(channel) => ("sc", channel.clone()),
            Facet::Brand(id) => ("fq", format!("B:{}", id)),
            Facet::Token(token) => ("ft", token.clone()),
            Facet::PriceRange { low, high } => ("fq", format!("P:[{} TO {}]", low, high)),
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facet::SalesChannel(c) => write!(f, "sc={}", c),
            Facet::Brand(b) => write!(f, "brand={}", b),
            Facet::Token(t) => write!(f, "token={}", t),
            Facet::PriceRange { low, high } => write!(f, "price={}-{}", low, high),
        }
    }
}

/// Next facet family to try when a partition stalls
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SplitStage {
    SalesChannel,
    Brand,
    Token,
    PriceRange,
    Exhausted,
}

impl SplitStage {
    pub fn next(self) -> Self {
        match self {
            Self::SalesChannel => Self::Brand,
            Self::Brand => Self::Token,
            Self::Token => Self::PriceRange,
            Self::PriceRange | Self::Exhausted => Self::Exhausted,
        }
    }
}

/// Why a partition stopped yielding new identities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Non-empty pages stopped surfacing unseen identities
    Stagnation,
    /// The remote enumeration ceiling was reached with pages still non-empty
    Truncated,
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stagnation => f.write_str("stagnation"),
            Self::Truncated => f.write_str("truncated"),
        }
    }
}

/// One unit of crawl work: a category path plus optional facet filters
///
/// Partitions are immutable. A stalled partition is replaced by new child
/// partitions built with [`Partition::child`] or [`Partition::rerun`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub path: Vec<String>,
    /// The facet that distinguishes this partition from its parent
    pub facet: Option<Facet>,
    /// Facets inherited from ancestors, outermost first
    pub ancestry: Vec<Facet>,
    /// Depth of the category path in the taxonomy
    pub depth: usize,
    /// Number of splits between this partition and its root
    pub level: u8,
    pub stage: SplitStage,
}

impl Partition {
    /// A leaf category partition with no filters
    pub fn root(path: Vec<String>) -> Self {
        let depth = path.len();
        Self {
            path,
            facet: None,
            ancestry: Vec::new(),
            depth,
            level: 0,
            stage: SplitStage::SalesChannel,
        }
    }

    /// A finer partition one escalation level below this one
    pub fn child(&self, facet: Facet, stage: SplitStage) -> Self {
        Self {
            path: self.path.clone(),
            facet: Some(facet),
            ancestry: self.filters(),
            depth: self.depth,
            level: self.level.saturating_add(1),
            stage,
        }
    }

    /// The same slice of the catalog under another sales channel
    ///
    /// Reruns stay at the current escalation level.
    pub fn rerun(&self, channel: &str) -> Self {
        Self {
            path: self.path.clone(),
            facet: Some(Facet::SalesChannel(channel.to_string())),
            ancestry: self.ancestry.clone(),
            depth: self.depth,
            level: self.level,
            stage: SplitStage::Brand,
        }
    }

    /// All filters in effect: ancestry followed by this partition's own facet
    pub fn filters(&self) -> Vec<Facet> {
        let mut filters = self.ancestry.clone();
        filters.extend(self.facet.iter().cloned());
        filters
    }

    /// Sales channel in effect, if any filter selects one
    pub fn sales_channel(&self) -> Option<&str> {
        self.ancestry
            .iter()
            .chain(self.facet.iter())
            .rev()
            .find_map(|f| match f {
                Facet::SalesChannel(c) => Some(c.as_str()),
                _ => None,
            })
    }

    /// Category and subcategory implied by the path
    pub fn category_pair(&self) -> (Option<&str>, Option<&str>) {
        (
            self.path.first().map(String::as_str),
            self.path.get(1).map(String::as_str),
        )
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path.join("/"))?;
        for facet in self.filters() {
            write!(f, " [{}]", facet)?;
        }
        Ok(())
    }
}
