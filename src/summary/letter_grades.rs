//! Letter grades from a course's cutoff table

use std::collections::HashMap;

use crate::providers::LetterGradeLookup;

/// Sort a course's `letter -> cutoff` map by cutoff, highest first.
/// Letters with the same cutoff are ordered alphabetically.
pub fn ordered_cutoffs(cutoffs: &HashMap<String, f64>) -> Vec<(String, f64)> {
    let mut ordered: Vec<(String, f64)> = cutoffs
        .iter()
        .map(|(letter, cutoff)| (letter.clone(), *cutoff))
        .collect();
    ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ordered
}

/// First letter whose cutoff the percentage reaches
#[derive(Debug, Default, Clone, Copy)]
pub struct CutoffTable;

impl LetterGradeLookup for CutoffTable {
    fn lookup(&self, percent: f64, ordered_cutoffs: &[(String, f64)]) -> Option<String> {
        ordered_cutoffs
            .iter()
            .find(|(_, cutoff)| percent >= *cutoff)
            .map(|(letter, _)| letter.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cutoffs() -> Vec<(String, f64)> {
        let map: HashMap<String, f64> = [("A", 0.9), ("B", 0.8), ("C", 0.7), ("Pass", 0.5)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        ordered_cutoffs(&map)
    }

    #[test]
    fn test_ordered_descending() {
        let letters: Vec<String> = cutoffs().into_iter().map(|(l, _)| l).collect();
        assert_eq!(letters, vec!["A", "B", "C", "Pass"]);
    }

    #[test]
    fn test_lookup_boundaries() {
        let table = cutoffs();
        assert_eq!(CutoffTable.lookup(0.95, &table).as_deref(), Some("A"));
        assert_eq!(CutoffTable.lookup(0.9, &table).as_deref(), Some("A"));
        assert_eq!(CutoffTable.lookup(0.72, &table).as_deref(), Some("C"));
        assert_eq!(CutoffTable.lookup(0.49, &table), None);
    }
}
