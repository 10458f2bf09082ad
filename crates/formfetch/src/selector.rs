// Copyright 2026 Formfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Picks which discovered document to retrieve.

use crate::error::FetchError;
use crate::types::CandidateArtifact;

/// Select the candidate at the 1-based `ordinal`.
///
/// A missing ordinal, or one outside `1..=len`, selects the first candidate.
pub fn select(
    candidates: &[CandidateArtifact],
    ordinal: Option<i64>,
) -> Result<&CandidateArtifact, FetchError> {
    let first = candidates.first().ok_or(FetchError::NoCandidates)?;
    let Some(requested) = ordinal else {
        return Ok(first);
    };
    match usize::try_from(requested) {
        Ok(n) if (1..=candidates.len()).contains(&n) => Ok(&candidates[n - 1]),
        _ => {
            tracing::debug!(
                requested,
                available = candidates.len(),
                "ordinal out of range, using the first candidate"
            );
            Ok(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(names: &[&str]) -> Vec<CandidateArtifact> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| CandidateArtifact {
                ordinal: i + 1,
                display_name: name.to_string(),
                internal_id: Some(format!("{}", 100 + i)),
                uri: format!("https://x/DownloadConsultaPublica/{}", 100 + i),
                status_label: None,
                score: 9.0,
                matched_by: Vec::new(),
            })
            .collect()
    }

    #[test]
    fn test_explicit_ordinal() {
        let list = candidates(&["A", "B", "C"]);
        assert_eq!(select(&list, Some(2)).unwrap().display_name, "B");
        assert_eq!(select(&list, Some(3)).unwrap().display_name, "C");
    }

    #[test]
    fn test_out_of_range_clamps_to_first() {
        let list = candidates(&["A", "B", "C"]);
        for ordinal in [None, Some(0), Some(-4), Some(4), Some(i64::MAX)] {
            assert_eq!(select(&list, ordinal).unwrap().display_name, "A");
        }
    }

    #[test]
    fn test_empty_list() {
        assert!(matches!(select(&[], Some(1)), Err(FetchError::NoCandidates)));
    }
}
