use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of embedding spaces stored against each record.
///
/// Every space has its own content-assembly recipe at indexing time and its
/// own search path at query time. The wire names double as the named-vector
/// keys in the enhanced collection layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VectorSpace {
    #[serde(rename = "semantic")]
    Semantic,
    #[serde(rename = "entities.categories")]
    EntityCategories,
    #[serde(rename = "entities.functionality")]
    EntityFunctionality,
    #[serde(rename = "entities.aliases")]
    EntityAliases,
    #[serde(rename = "composites.toolType")]
    CompositeToolType,
}

impl VectorSpace {
    pub const ALL: [VectorSpace; 5] = [
        VectorSpace::Semantic,
        VectorSpace::EntityCategories,
        VectorSpace::EntityFunctionality,
        VectorSpace::EntityAliases,
        VectorSpace::CompositeToolType,
    ];

    /// Wire name, also the named-vector key in the enhanced collection.
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorSpace::Semantic => "semantic",
            VectorSpace::EntityCategories => "entities.categories",
            VectorSpace::EntityFunctionality => "entities.functionality",
            VectorSpace::EntityAliases => "entities.aliases",
            VectorSpace::CompositeToolType => "composites.toolType",
        }
    }

    /// Collection name in the legacy one-collection-per-space layout.
    /// Dots are not legal in collection names, so they become underscores.
    pub fn legacy_collection(&self) -> String {
        format!("tools_{}", self.as_str().replace('.', "_"))
    }

    /// Source label attached to candidates retrieved from this space.
    pub fn source_label(&self) -> String {
        format!("vector:{}", self.as_str())
    }
}

impl fmt::Display for VectorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(VectorSpace::Semantic),
            "entities.categories" => Ok(VectorSpace::EntityCategories),
            "entities.functionality" => Ok(VectorSpace::EntityFunctionality),
            "entities.aliases" => Ok(VectorSpace::EntityAliases),
            "composites.toolType" => Ok(VectorSpace::CompositeToolType),
            other => Err(format!("unknown vector space: {other}")),
        }
    }
}
