//! Provisional grouping of unmapped faces for human review.

use crate::embedding::Embedding;
use crate::store::{IdentityStore, StoreError};
use crate::types::FaceId;

/// Partition the currently unmapped faces into provisional groups of
/// faces suspected to depict the same unidentified person.
///
/// Greedy single-seed grouping: each unassigned face in turn seeds a new
/// group and pulls in every later unassigned face whose similarity *to
/// the seed* is at or above the threshold. Members are never compared to
/// each other, so two faces can share a group while being mutually
/// dissimilar — this single-link-to-seed behavior is intentional and a
/// human confirms every group before it becomes an identity.
///
/// Faces without a usable embedding are dropped, not grouped. Every
/// remaining face lands in exactly one group; groups and their members
/// keep the store's iteration order.
pub fn cluster_unmapped(
    store: &dyn IdentityStore,
    similarity_threshold: f32,
) -> Result<Vec<Vec<FaceId>>, StoreError> {
    let unmapped = store.unmapped_faces()?;

    let mut face_ids: Vec<FaceId> = Vec::with_capacity(unmapped.len());
    let mut embeddings: Vec<Embedding> = Vec::with_capacity(unmapped.len());
    for face in &unmapped {
        match store.face_embedding(face.id)? {
            Some(embedding) => {
                face_ids.push(face.id);
                embeddings.push(embedding);
            }
            None => {
                tracing::debug!(face_id = face.id, "skipping face with unusable embedding");
            }
        }
    }

    let mut groups: Vec<Vec<FaceId>> = Vec::new();
    let mut assigned = vec![false; face_ids.len()];

    for seed in 0..face_ids.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let mut group = vec![face_ids[seed]];

        for other in 0..face_ids.len() {
            if other == seed || assigned[other] {
                continue;
            }
            let similarity = embeddings[seed].similarity(&embeddings[other]);
            if similarity >= similarity_threshold {
                assigned[other] = true;
                group.push(face_ids[other]);
            }
        }

        groups.push(group);
    }

    tracing::debug!(
        faces = face_ids.len(),
        groups = groups.len(),
        threshold = similarity_threshold,
        "clustered unmapped faces"
    );

    Ok(groups)
}
