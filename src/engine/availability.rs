use ulid::Ulid;

use crate::model::*;

// ── Availability predicate ───────────────────────────────────────

/// True iff no pending/confirmed booking (other than `exclude`) overlaps `stay`.
/// Two stays conflict iff `a.start < b.end && b.start < a.end`.
pub fn is_available(property: &PropertyState, stay: &Span, exclude: Option<Ulid>) -> bool {
    property.blocking(stay, exclude).next().is_none()
}

/// Open date ranges of a property inside `window`: the window minus every
/// blocking stay, clamped to the window.
pub fn free_windows(property: &PropertyState, window: &Span) -> Vec<Span> {
    let mut taken: Vec<Span> = property
        .blocking(window, None)
        .map(|b| {
            Span::new(
                b.stay.start.max(window.start),
                b.stay.end.min(window.end),
            )
        })
        .collect();
    if taken.is_empty() {
        return vec![*window];
    }
    taken.sort_by_key(|s| s.start);
    let taken = merge_overlapping(&taken);
    subtract_intervals(&[*window], &taken)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
