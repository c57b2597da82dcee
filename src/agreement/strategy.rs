use std::fmt;
use std::str::FromStr;

/// Quorum and tie-break policy of an arbitration round. Configured once per cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArbitrationStrategy {
    /// Evict only what is needed for every survivor to reach every other survivor. The side of a
    /// broken link with more broken links goes first, the higher id on a tie.
    MatchingCardinality,
    /// Evict every node somebody lost.
    NoQuarter,
}

impl Default for ArbitrationStrategy {
    fn default() -> Self {
        ArbitrationStrategy::MatchingCardinality
    }
}

impl fmt::Display for ArbitrationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArbitrationStrategy::MatchingCardinality => write!(f, "matching-cardinality"),
            ArbitrationStrategy::NoQuarter => write!(f, "no-quarter"),
        }
    }
}

impl FromStr for ArbitrationStrategy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, crate::Error> {
        match s.trim() {
            "matching" | "matching-cardinality" => Ok(ArbitrationStrategy::MatchingCardinality),
            "no-quarter" => Ok(ArbitrationStrategy::NoQuarter),
            _ => Err(crate::Error::TryFromStringError),
        }
    }
}
