use crate::types::Idx;

/// Results of a range search over `nq` queries.
///
/// The hits of query `i` live at `lims[i]..lims[i + 1]` in `labels` and
/// `distances`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSearchResult {
    lims: Vec<usize>,
    labels: Vec<Idx>,
    distances: Vec<f32>,
}

impl Default for RangeSearchResult {
    fn default() -> Self {
        Self {
            lims: vec![0],
            labels: Vec::new(),
            distances: Vec::new(),
        }
    }
}

impl RangeSearchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the hits of the next query.
    pub fn push_query(&mut self, hits: impl IntoIterator<Item = (Idx, f32)>) {
        for (label, distance) in hits {
            self.labels.push(label);
            self.distances.push(distance);
        }
        self.lims.push(self.labels.len());
    }

    pub fn nq(&self) -> usize {
        self.lims.len() - 1
    }

    pub fn lims(&self) -> &[usize] {
        &self.lims
    }

    pub fn labels(&self) -> &[Idx] {
        &self.labels
    }

    pub fn distances(&self) -> &[f32] {
        &self.distances
    }

    /// Hits of query `i`, or `None` if `i >= nq()`.
    pub fn query(&self, i: usize) -> Option<(&[Idx], &[f32])> {
        let start = *self.lims.get(i)?;
        let end = *self.lims.get(i + 1)?;
        Some((&self.labels[start..end], &self.distances[start..end]))
    }

    pub fn total_hits(&self) -> usize {
        self.labels.len()
    }
}

impl FromIterator<Vec<(Idx, f32)>> for RangeSearchResult {
    fn from_iter<T: IntoIterator<Item = Vec<(Idx, f32)>>>(iter: T) -> Self {
        let mut result = Self::new();
        for hits in iter {
            result.push_query(hits);
        }
        result
    }
}
