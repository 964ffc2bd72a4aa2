use similar::{Algorithm, DiffOp, capture_diff_slices};

/// Edit distance between normalized prelim and final text, plus the distance
/// as a fraction of the normalized final length.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome {
    pub score: i64,
    pub percent: f64,
}

/// Collapse hyphens to spaces, collapse whitespace runs to single spaces and
/// trim the ends. Dictation renders "post-op" and "post op" interchangeably,
/// so hyphenation must not count as an edit.
pub fn normalize(text: &str) -> String {
    text.replace('-', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Score the difference between a prelim and its signed final. Returns `None`
/// when the normalized final text is empty: there is nothing to compare
/// against, and the caller leaves the record unscored rather than writing a
/// zero.
pub fn score(prelim: &str, final_text: &str) -> Option<DiffOutcome> {
    let prelim_norm = normalize(prelim);
    let final_norm = normalize(final_text);

    let final_len = final_norm.chars().count();
    if final_len == 0 {
        return None;
    }

    let mut chunks = char_diff(&prelim_norm, &final_norm);
    cleanup_semantic(&mut chunks);
    let score = levenshtein(&chunks) as i64;
    let percent = score as f64 * 100.0 / final_len as f64;

    Some(DiffOutcome { score, percent })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk {
    tag: Tag,
    text: String,
}

impl Chunk {
    fn new(tag: Tag, text: String) -> Self {
        Self { tag, text }
    }

    fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Character-level diff of two strings as a flat chunk list, with adjacent
/// chunks of the same kind already merged.
fn char_diff(old: &str, new: &str) -> Vec<Chunk> {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();

    let mut chunks = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, &old_chars, &new_chars) {
        match op {
            DiffOp::Equal { old_index, len, .. } => {
                push_chunk(&mut chunks, Tag::Equal, &old_chars[old_index..old_index + len]);
            }
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                push_chunk(
                    &mut chunks,
                    Tag::Delete,
                    &old_chars[old_index..old_index + old_len],
                );
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                push_chunk(
                    &mut chunks,
                    Tag::Insert,
                    &new_chars[new_index..new_index + new_len],
                );
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                push_chunk(
                    &mut chunks,
                    Tag::Delete,
                    &old_chars[old_index..old_index + old_len],
                );
                push_chunk(
                    &mut chunks,
                    Tag::Insert,
                    &new_chars[new_index..new_index + new_len],
                );
            }
        }
    }
    chunks
}

fn push_chunk(chunks: &mut Vec<Chunk>, tag: Tag, chars: &[char]) {
    if chars.is_empty() {
        return;
    }
    let text: String = chars.iter().collect();
    match chunks.last_mut() {
        Some(last) if last.tag == tag => last.text.push_str(&text),
        _ => chunks.push(Chunk::new(tag, text)),
    }
}

/// Reduce over-fragmented diffs: an equality that is no longer than the edits
/// on both sides of it is demoted into a delete/insert pair, so runs of tiny
/// coincidental matches inside a rewritten passage count as part of the
/// rewrite instead of splitting it. Mirrors the semantic cleanup pass of the
/// classic diff-match-patch algorithm.
fn cleanup_semantic(chunks: &mut Vec<Chunk>) {
    let mut changed = false;
    // Indices of equalities seen so far on the current scan.
    let mut equalities: Vec<usize> = Vec::new();
    let mut last_equality: Option<usize> = None;
    // Edit sizes before and after the candidate equality.
    let mut ins_before = 0usize;
    let mut del_before = 0usize;
    let mut ins_after = 0usize;
    let mut del_after = 0usize;

    let mut pointer = 0usize;
    while pointer < chunks.len() {
        if chunks[pointer].tag == Tag::Equal {
            equalities.push(pointer);
            ins_before = ins_after;
            del_before = del_after;
            ins_after = 0;
            del_after = 0;
            last_equality = Some(pointer);
            pointer += 1;
            continue;
        }

        let size = chunks[pointer].char_len();
        if chunks[pointer].tag == Tag::Insert {
            ins_after += size;
        } else {
            del_after += size;
        }

        let demote = match last_equality {
            Some(index) => {
                let eq_len = chunks[index].char_len();
                eq_len <= ins_before.max(del_before) && eq_len <= ins_after.max(del_after)
            }
            None => false,
        };

        if demote {
            let index = last_equality.unwrap();
            let text = chunks[index].text.clone();
            chunks[index] = Chunk::new(Tag::Delete, text.clone());
            chunks.insert(index + 1, Chunk::new(Tag::Insert, text));

            // Drop the demoted equality and rewind to the one before it,
            // which now borders a larger edit and must be re-evaluated.
            equalities.pop();
            equalities.pop();
            pointer = equalities.last().map(|&prev| prev + 1).unwrap_or(0);
            ins_before = 0;
            del_before = 0;
            ins_after = 0;
            del_after = 0;
            last_equality = None;
            changed = true;
            continue;
        }

        pointer += 1;
    }

    if changed {
        merge_edit_runs(chunks);
    }
}

/// Coalesce each maximal run of edits into a single delete followed by a
/// single insert, and merge adjacent equalities.
fn merge_edit_runs(chunks: &mut Vec<Chunk>) {
    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    let mut deleted = String::new();
    let mut inserted = String::new();

    for chunk in chunks.drain(..) {
        match chunk.tag {
            Tag::Delete => deleted.push_str(&chunk.text),
            Tag::Insert => inserted.push_str(&chunk.text),
            Tag::Equal => {
                flush_edits(&mut merged, &mut deleted, &mut inserted);
                match merged.last_mut() {
                    Some(last) if last.tag == Tag::Equal => last.text.push_str(&chunk.text),
                    _ => merged.push(chunk),
                }
            }
        }
    }
    flush_edits(&mut merged, &mut deleted, &mut inserted);

    *chunks = merged;
}

fn flush_edits(merged: &mut Vec<Chunk>, deleted: &mut String, inserted: &mut String) {
    if !deleted.is_empty() {
        merged.push(Chunk::new(Tag::Delete, std::mem::take(deleted)));
    }
    if !inserted.is_empty() {
        merged.push(Chunk::new(Tag::Insert, std::mem::take(inserted)));
    }
}

/// Levenshtein distance over a cleaned chunk list: each run of edits between
/// equalities costs the larger of its inserted and deleted character counts.
fn levenshtein(chunks: &[Chunk]) -> usize {
    let mut total = 0usize;
    let mut inserted = 0usize;
    let mut deleted = 0usize;

    for chunk in chunks {
        match chunk.tag {
            Tag::Insert => inserted += chunk.char_len(),
            Tag::Delete => deleted += chunk.char_len(),
            Tag::Equal => {
                total += inserted.max(deleted);
                inserted = 0;
                deleted = 0;
            }
        }
    }
    total + inserted.max(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_hyphens_and_whitespace() {
        assert_eq!(
            normalize("post-op changes  noted\n\nstable"),
            "post op changes noted stable"
        );
    }

    #[test]
    fn normalize_trims_ends() {
        assert_eq!(normalize("  ct chest \t"), "ct chest");
        assert_eq!(normalize("---"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn identical_reports_score_zero() {
        let outcome = score("no acute findings", "no acute findings").expect("scoreable");
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.percent, 0.0);
    }

    #[test]
    fn appended_sentence_scores_its_length() {
        let prelim = "ct chest no acute findings";
        let final_text = "ct chest no acute findings no effusion";
        let outcome = score(prelim, final_text).expect("scoreable");

        // " no effusion" is 12 inserted characters against a 38-character final.
        assert_eq!(outcome.score, 12);
        let final_len = normalize(final_text).chars().count() as f64;
        assert!((outcome.percent - outcome.score as f64 * 100.0 / final_len).abs() < f64::EPSILON);
        assert!(outcome.score > 0);
    }

    #[test]
    fn empty_final_is_unscoreable() {
        assert_eq!(score("ct chest no acute findings", ""), None);
        assert_eq!(score("ct chest no acute findings", " - -- "), None);
    }

    #[test]
    fn empty_prelim_scores_full_final_length() {
        let outcome = score("", "no acute findings").expect("scoreable");
        assert_eq!(outcome.score, "no acute findings".len() as i64);
        assert!((outcome.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cleanup_demotes_short_equality_between_larger_edits() {
        let mut chunks = vec![
            Chunk::new(Tag::Delete, "abc".to_string()),
            Chunk::new(Tag::Equal, "d".to_string()),
            Chunk::new(Tag::Insert, "efg".to_string()),
        ];
        cleanup_semantic(&mut chunks);
        assert_eq!(
            chunks,
            vec![
                Chunk::new(Tag::Delete, "abcd".to_string()),
                Chunk::new(Tag::Insert, "defg".to_string()),
            ]
        );
        assert_eq!(levenshtein(&chunks), 4);
    }

    #[test]
    fn cleanup_keeps_substantial_equalities() {
        let mut chunks = vec![
            Chunk::new(Tag::Delete, "ab".to_string()),
            Chunk::new(Tag::Equal, "a long stable passage".to_string()),
            Chunk::new(Tag::Insert, "cd".to_string()),
        ];
        let before = chunks.clone();
        cleanup_semantic(&mut chunks);
        assert_eq!(chunks, before);
    }

    #[test]
    fn levenshtein_counts_max_of_each_edit_run() {
        let chunks = vec![
            Chunk::new(Tag::Delete, "abc".to_string()),
            Chunk::new(Tag::Insert, "xy".to_string()),
            Chunk::new(Tag::Equal, "stable".to_string()),
            Chunk::new(Tag::Insert, "12345".to_string()),
        ];
        assert_eq!(levenshtein(&chunks), 8);
    }

    #[test]
    fn rewrite_with_coincidental_matches_scores_as_rewrite() {
        // The fragments shared between these two sentences are shorter than
        // the edits around them, so the cleaned score approaches the length
        // of the longer sentence rather than a patchwork of tiny edits.
        let prelim = "mild cardiomegaly without effusion";
        let final_text = "severe bilateral pleural effusions";
        let outcome = score(prelim, final_text).expect("scoreable");
        assert!(outcome.score as usize >= "severe bilateral pleural".len() / 2);
    }
}
