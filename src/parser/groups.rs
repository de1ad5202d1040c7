use std::collections::{BTreeSet, HashMap};

use crate::db::{TagRow, WordRow};

/// A maximal contiguous stretch of words sharing one label set, inside one
/// structural segment.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRun {
    pub tags: BTreeSet<String>,
    pub words: Vec<WordRow>,
}

pub type Segment = Vec<GroupedRun>;

/// Turn a sparse tag snapshot into ordered segments of grouped runs.
///
/// Tagged words are walked in `element_position` order (document order breaks
/// ties, since the sort is stable over the stored order); a position that
/// fails to strictly increase marks entry into a new structural container and
/// closes the segment. Within a segment, a run ends wherever the label set
/// changes. Untagged words never appear in the output.
///
/// Containers that happen to share low position numbers can interleave inside
/// one segment before the reset is seen; the behavior is intentional.
pub fn group_words(words: &[WordRow], tags: &[TagRow]) -> Vec<Segment> {
    let mut labels: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for tag in tags {
        labels.entry(tag.word_id).or_default().insert(tag.tag.clone());
    }

    let mut tagged: Vec<&WordRow> = words
        .iter()
        .filter(|word| labels.contains_key(&word.id))
        .collect();
    tagged.sort_by_key(|word| word.element_position);

    let mut segments: Vec<Segment> = Vec::new();
    let mut current: Segment = Vec::new();
    let mut previous_position: Option<i64> = None;

    for word in tagged {
        if let Some(previous) = previous_position {
            if word.element_position <= previous && !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        }
        previous_position = Some(word.element_position);

        let word_tags = &labels[&word.id];
        match current.last_mut() {
            Some(run) if run.tags == *word_tags => run.words.push(word.clone()),
            _ => current.push(GroupedRun {
                tags: word_tags.clone(),
                words: vec![word.clone()],
            }),
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }

    segments
}

// ── Tests ──
