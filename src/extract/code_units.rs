//! Function and comment extraction over a single file.

use std::collections::BTreeMap;

use super::registry::{ExtractionRule, Language};
use super::{CodeUnit, UnitKind};

/// A lazy, restartable view over the code units in one file.
///
/// Nothing is matched until the view is iterated, and each iteration starts
/// again from the borrowed input, so two iterations always agree.
#[derive(Clone, Copy)]
pub struct CodeUnits<'a> {
    path: &'a str,
    content: &'a str,
    language: Option<&'a Language>,
}

/// A match that passed its rule's filters but has not yet been placed.
struct Candidate {
    start: usize,
    end: usize,
    text_start: usize,
    kind: UnitKind,
    text: String,
}

impl<'a> CodeUnits<'a> {
    pub(crate) fn new(path: &'a str, content: &'a str, language: Option<&'a Language>) -> Self {
        Self {
            path,
            content,
            language,
        }
    }

    /// The file's language, if the registry knows it.
    pub fn language(&self) -> Option<&'a Language> {
        self.language
    }

    /// Runs the extraction and yields units in source order.
    pub fn iter(&self) -> std::vec::IntoIter<CodeUnit> {
        self.collect_units().into_iter()
    }

    fn collect_units(&self) -> Vec<CodeUnit> {
        let Some(language) = self.language else {
            return Vec::new();
        };

        // start -> end of every accepted span
        let mut accepted: BTreeMap<usize, Candidate> = BTreeMap::new();
        for rules in [language.function_rules(), language.comment_rules()] {
            let mut candidates: Vec<Candidate> = rules
                .iter()
                .flat_map(|rule| self.candidates(rule))
                .collect();
            // Earliest first; at the same start the longer span wins.
            candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

            for candidate in candidates {
                if !overlaps_any(&accepted, candidate.start, candidate.end) {
                    accepted.insert(candidate.start, candidate);
                }
            }
        }

        let lines = LineIndex::new(self.content);
        accepted
            .into_values()
            .map(|candidate| {
                let (line, column) = lines.position(self.content, candidate.text_start);
                CodeUnit {
                    kind: candidate.kind,
                    text: candidate.text,
                    path: self.path.to_string(),
                    language: language.id().to_string(),
                    line,
                    column,
                }
            })
            .collect()
    }

    fn candidates<'r>(&'r self, rule: &'r ExtractionRule) -> impl Iterator<Item = Candidate> + 'r {
        rule.regex()
            .captures_iter(self.content)
            .filter_map(move |caps| {
                let whole = caps.get(0)?;
                if whole.is_empty() {
                    return None;
                }
                let group = rule.captured(&caps)?;
                let text = rule.unit_text(group.as_str())?;
                Some(Candidate {
                    start: whole.start(),
                    end: whole.end(),
                    text_start: group.start(),
                    kind: rule.kind(),
                    text,
                })
            })
    }
}

impl IntoIterator for CodeUnits<'_> {
    type Item = CodeUnit;
    type IntoIter = std::vec::IntoIter<CodeUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for &CodeUnits<'_> {
    type Item = CodeUnit;
    type IntoIter = std::vec::IntoIter<CodeUnit>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accepted spans never overlap, so only the nearest neighbours can collide.
fn overlaps_any(accepted: &BTreeMap<usize, Candidate>, start: usize, end: usize) -> bool {
    let before = accepted
        .range(..=start)
        .next_back()
        .is_some_and(|(_, prev)| prev.end > start);
    let after = accepted
        .range(start..)
        .next()
        .is_some_and(|(&next_start, _)| next_start < end);
    before || after
}

/// Byte offsets of line starts, for offset to line/column conversion.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line and character column of a byte offset.
    fn position(&self, content: &str, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|&start| start <= offset);
        let line_start = self.starts[line - 1];
        let column = content[line_start..offset].chars().count() + 1;
        (line, column)
    }
}
