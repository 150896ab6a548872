//! Identity resolver — best-centroid search over the known persons.

use crate::embedding::Embedding;
use crate::store::{IdentityStore, StoreError};
use crate::types::{MatchOutcome, PersonId};

/// Decides which existing person, if any, a candidate embedding belongs to.
///
/// Centroids are recomputed from the store on every call so the scan is
/// always correct under same-transaction mutations; nothing is cached.
/// Cost is O(persons × faces-per-person), which is fine at
/// personal-gallery scale.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver {
    /// Minimum similarity for a positive match. A candidate scoring
    /// exactly at the threshold is accepted; `<` is the rejection test.
    pub recognition_threshold: f32,
}

impl IdentityResolver {
    pub fn new(recognition_threshold: f32) -> Self {
        Self { recognition_threshold }
    }

    /// Scan every person's centroid and return the best match, or
    /// `NoMatch` carrying the best losing similarity for diagnostics.
    ///
    /// Persons with no member faces (or none with usable embeddings) are
    /// skipped. Ties keep the person encountered first: only a strictly
    /// greater similarity replaces the current best.
    pub fn resolve(
        &self,
        store: &dyn IdentityStore,
        candidate: &Embedding,
    ) -> Result<MatchOutcome, StoreError> {
        let mut best_person: Option<PersonId> = None;
        let mut best_similarity = 0.0f32;

        for person in store.all_persons()? {
            let Some(centroid) = person_centroid(store, person.id)? else {
                continue;
            };
            let similarity = candidate.similarity(&centroid);
            if similarity > best_similarity {
                best_similarity = similarity;
                best_person = Some(person.id);
            }
        }

        if best_similarity < self.recognition_threshold {
            tracing::debug!(
                best_similarity,
                threshold = self.recognition_threshold,
                "no person above recognition threshold"
            );
            return Ok(MatchOutcome::NoMatch { best_similarity });
        }

        match best_person {
            Some(person_id) => Ok(MatchOutcome::Matched {
                person_id,
                similarity: best_similarity,
            }),
            // Reachable only with a zero threshold and no scorable person.
            None => Ok(MatchOutcome::NoMatch { best_similarity: 0.0 }),
        }
    }
}

/// Representative embedding for a person: the renormalized mean of its
/// member faces' embeddings. `None` when the person has no usable members.
pub fn person_centroid(
    store: &dyn IdentityStore,
    person_id: PersonId,
) -> Result<Option<Embedding>, StoreError> {
    let mut members = Vec::new();
    for face in store.faces_for_person(person_id)? {
        if let Some(embedding) = store.face_embedding(face.id)? {
            members.push(embedding);
        }
    }
    if members.is_empty() {
        return Ok(None);
    }
    // Non-empty by the check above, and the store enforces a uniform
    // dimension, so centroid cannot fail here.
    match Embedding::centroid(&members) {
        Ok(centroid) => Ok(Some(centroid)),
        Err(err) => {
            tracing::warn!(person_id, error = %err, "unusable member embeddings; skipping person");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::{insert_face, TEST_DIM};
    use crate::store::MemoryStore;

    fn unit(values: Vec<f32>) -> Embedding {
        Embedding::new(values).normalize()
    }

    /// Insert a face and map it to a fresh person with the given name.
    fn person_with_face(store: &MemoryStore, name: &str, values: Vec<f32>) -> i64 {
        let face = insert_face(store, &format!("/g/{name}.jpg"), values);
        let person = store.add_person(Some(name), None, None).unwrap();
        store.upsert_mapping(face, person, None, true).unwrap();
        person
    }

    #[test]
    fn test_empty_person_set_is_no_match_with_zero_similarity() {
        let store = MemoryStore::new(TEST_DIM);
        let resolver = IdentityResolver::new(0.65);
        let outcome = resolver
            .resolve(&store, &unit(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(outcome, MatchOutcome::NoMatch { best_similarity: 0.0 });
    }

    #[test]
    fn test_exact_self_match_scores_one() {
        let store = MemoryStore::new(TEST_DIM);
        let alice = person_with_face(&store, "alice", vec![0.3, 0.1, 0.9, 0.2]);

        let resolver = IdentityResolver::new(0.65);
        let outcome = resolver
            .resolve(&store, &unit(vec![0.3, 0.1, 0.9, 0.2]))
            .unwrap();
        match outcome {
            MatchOutcome::Matched { person_id, similarity } => {
                assert_eq!(person_id, alice);
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            MatchOutcome::NoMatch { .. } => panic!("expected a match"),
        }
    }

    #[test]
    fn test_best_of_several_persons_wins() {
        let store = MemoryStore::new(TEST_DIM);
        let _alice = person_with_face(&store, "alice", vec![1.0, 0.0, 0.0, 0.0]);
        let bob = person_with_face(&store, "bob", vec![0.0, 1.0, 0.0, 0.0]);

        let resolver = IdentityResolver::new(0.65);
        let outcome = resolver
            .resolve(&store, &unit(vec![0.1, 1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(outcome.person_id(), Some(bob));
    }

    #[test]
    fn test_below_threshold_reports_best_losing_similarity() {
        let store = MemoryStore::new(TEST_DIM);
        let _alice = person_with_face(&store, "alice", vec![1.0, 0.0, 0.0, 0.0]);

        let resolver = IdentityResolver::new(0.9);
        // Orthogonal to Alice: cosine 0 maps to similarity 0.5.
        let outcome = resolver
            .resolve(&store, &unit(vec![0.0, 1.0, 0.0, 0.0]))
            .unwrap();
        match outcome {
            MatchOutcome::NoMatch { best_similarity } => {
                assert!((best_similarity - 0.5).abs() < 1e-6);
            }
            MatchOutcome::Matched { .. } => panic!("expected no match"),
        }
    }

    #[test]
    fn test_similarity_exactly_at_threshold_is_a_match() {
        let store = MemoryStore::new(TEST_DIM);
        let alice = person_with_face(&store, "alice", vec![1.0, 0.0, 0.0, 0.0]);

        // Orthogonal candidate scores exactly 0.5.
        let resolver = IdentityResolver::new(0.5);
        let outcome = resolver
            .resolve(&store, &unit(vec![0.0, 1.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(outcome.person_id(), Some(alice));
    }

    #[test]
    fn test_tie_keeps_first_person_in_iteration_order() {
        let store = MemoryStore::new(TEST_DIM);
        // Same member embedding for both, so both centroids score
        // identically. Persons iterate name-sorted: "alpha" first.
        let alpha = person_with_face(&store, "alpha", vec![1.0, 0.0, 0.0, 0.0]);
        let _beta = person_with_face(&store, "beta", vec![1.0, 0.0, 0.0, 0.0]);

        let resolver = IdentityResolver::new(0.65);
        let outcome = resolver
            .resolve(&store, &unit(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(outcome.person_id(), Some(alpha));
    }

    #[test]
    fn test_person_without_faces_is_skipped() {
        let store = MemoryStore::new(TEST_DIM);
        let _empty = store.add_person(Some("nobody"), None, None).unwrap();
        let alice = person_with_face(&store, "alice", vec![1.0, 0.0, 0.0, 0.0]);

        let resolver = IdentityResolver::new(0.65);
        let outcome = resolver
            .resolve(&store, &unit(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert_eq!(outcome.person_id(), Some(alice));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let store = MemoryStore::new(TEST_DIM);
        person_with_face(&store, "alice", vec![1.0, 0.2, 0.0, 0.0]);
        person_with_face(&store, "bob", vec![0.0, 1.0, 0.3, 0.0]);

        let resolver = IdentityResolver::new(0.65);
        let candidate = unit(vec![0.5, 0.5, 0.1, 0.0]);
        let first = resolver.resolve(&store, &candidate).unwrap();
        let second = resolver.resolve(&store, &candidate).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_centroid_uses_all_member_faces() {
        let store = MemoryStore::new(TEST_DIM);
        let person = store.add_person(Some("alice"), None, None).unwrap();
        for (i, values) in [vec![1.0, 0.1, 0.0, 0.0], vec![1.0, -0.1, 0.0, 0.0]]
            .into_iter()
            .enumerate()
        {
            let face = insert_face(&store, &format!("/g/alice-{i}.jpg"), values);
            store.upsert_mapping(face, person, None, true).unwrap();
        }

        let centroid = person_centroid(&store, person).unwrap().unwrap();
        // The off-axis components cancel; the mean points along x.
        assert!((centroid.values[0] - 1.0).abs() < 1e-4);
        assert!(centroid.values[1].abs() < 1e-4);
    }
}
