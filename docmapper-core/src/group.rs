//! Grouping specifications for the group passthrough.

/// An aggregate computed per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accumulator {
    /// Number of documents in the group.
    Count,
    /// Sum of a numeric field.
    Sum(String),
    /// Smallest value of a field.
    Min(String),
    /// Largest value of a field.
    Max(String),
}

impl Accumulator {
    /// The field the accumulator reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Accumulator::Count => None,
            Accumulator::Sum(field) | Accumulator::Min(field) | Accumulator::Max(field) => {
                Some(field)
            }
        }
    }

    /// The same accumulator reading `field` instead.
    pub fn with_field(&self, field: String) -> Self {
        match self {
            Accumulator::Count => Accumulator::Count,
            Accumulator::Sum(_) => Accumulator::Sum(field),
            Accumulator::Min(_) => Accumulator::Min(field),
            Accumulator::Max(_) => Accumulator::Max(field),
        }
    }
}

/// Key fields plus named accumulators.
///
/// Each result document carries the key fields followed by one entry per
/// accumulator, under the accumulator's output name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupBy {
    pub keys: Vec<String>,
    pub accumulators: Vec<(String, Accumulator)>,
}

impl GroupBy {
    pub fn new<K: Into<String>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            accumulators: Vec::new(),
        }
    }

    pub fn count(mut self, output: impl Into<String>) -> Self {
        self.accumulators.push((output.into(), Accumulator::Count));
        self
    }

    pub fn sum(mut self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulators.push((output.into(), Accumulator::Sum(field.into())));
        self
    }

    pub fn min(mut self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulators.push((output.into(), Accumulator::Min(field.into())));
        self
    }

    pub fn max(mut self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulators.push((output.into(), Accumulator::Max(field.into())));
        self
    }
}
