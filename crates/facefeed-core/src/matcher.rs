use crate::catalog::Catalog;
use crate::types::{Embedding, Label};
use parking_lot::Mutex;
use std::collections::BTreeSet;

/// `(probe_len, reference_len)` pairs already warned about.
static REPORTED_MISMATCHES: Mutex<BTreeSet<(usize, usize)>> = Mutex::new(BTreeSet::new());

/// True the first time a length pair is seen in this process.
fn first_mismatch(probe_len: usize, reference_len: usize) -> bool {
    REPORTED_MISMATCHES.lock().insert((probe_len, reference_len))
}

/// Default cosine similarity needed for a positive match.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Strategy for resolving a probe embedding against the catalog.
pub trait Matcher: Send + Sync {
    fn match_label(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Label;
}

/// Returns the first reference, in catalog order, that reaches the threshold.
///
/// Identities are scanned in catalog order and their references in stored
/// order, so an earlier identity wins over a later one with a higher score.
pub struct FirstMatch;

impl Matcher for FirstMatch {
    fn match_label(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Label {
        for (label, reference) in comparable(probe, catalog) {
            if probe.similarity(reference) >= threshold {
                return Label::Known(label.to_string());
            }
        }
        Label::Unrecognized
    }
}

/// Returns the globally most similar reference when it reaches the threshold.
pub struct BestMatch;

impl Matcher for BestMatch {
    fn match_label(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Label {
        let mut best: Option<(&str, f32)> = None;
        for (label, reference) in comparable(probe, catalog) {
            let sim = probe.similarity(reference);
            if best.map_or(true, |(_, b)| sim > b) {
                best = Some((label, sim));
            }
        }

        match best {
            Some((label, sim)) if sim >= threshold => Label::Known(label.to_string()),
            _ => Label::Unrecognized,
        }
    }
}

/// Every `(label, reference)` whose length matches the probe, in scan order.
/// Length mismatches are skipped; each distinct length pair is warned about
/// once and traced afterwards.
fn comparable<'a>(
    probe: &'a Embedding,
    catalog: &'a Catalog,
) -> impl Iterator<Item = (&'a str, &'a Embedding)> + 'a {
    catalog.identities().iter().flat_map(move |identity| {
        identity.references.iter().filter_map(move |reference| {
            let reference_len = reference.embedding.len();
            if reference_len != probe.len() {
                if first_mismatch(probe.len(), reference_len) {
                    tracing::warn!(
                        label = %identity.label,
                        source = %reference.source,
                        probe_len = probe.len(),
                        reference_len,
                        "embedding shape mismatch, skipping references of this length"
                    );
                } else {
                    tracing::trace!(label = %identity.label, source = %reference.source, "embedding shape mismatch");
                }
                return None;
            }
            Some((identity.label.as_str(), &reference.embedding))
        })
    })
}
