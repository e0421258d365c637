//! Data loading for frame batches, reference segmentations, label lists and
//! ARPA language models.
//!
//! Frame and segment batches hold one utterance per block: a name line, the
//! rows, then a line with a single `.`.

use std::f64::consts::LN_10;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use scrf_core::{LabelSet, LanguageModel, Segment};
use tracing::debug;

use crate::error::{Result, TrainerError};

const END_OF_BLOCK: &str = ".";

/// Acoustic frames of one utterance, `frames x dim`.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub name: String,
    pub frames: Array2<f64>,
}

/// Reference segmentation of one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub name: String,
    pub segments: Vec<Segment>,
}

/// A training example: frames with their reference segmentation.
#[derive(Debug, Clone)]
pub struct Example {
    pub name: String,
    pub frames: Array2<f64>,
    pub segments: Vec<Segment>,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|e| TrainerError::io(path, e))?;
    Ok(BufReader::new(file))
}

/// Line source shared by the block readers.
struct Blocks<R> {
    path: PathBuf,
    lines: Lines<R>,
    line: usize,
}

impl<R: BufRead> Blocks<R> {
    fn new(reader: R, path: PathBuf) -> Self {
        Self {
            path,
            lines: reader.lines(),
            line: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        match self.lines.next() {
            Some(Ok(line)) => {
                self.line += 1;
                Ok(Some(line))
            }
            Some(Err(e)) => Err(TrainerError::io(&self.path, e)),
            None => Ok(None),
        }
    }

    /// Name of the next block, skipping blank lines. `None` at end of input.
    fn header(&mut self) -> Result<Option<String>> {
        while let Some(line) = self.next_line()? {
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
        Ok(None)
    }

    /// Next row of the current block, `None` at its terminator.
    fn row(&mut self) -> Result<Option<String>> {
        match self.next_line()? {
            Some(line) if line.trim() == END_OF_BLOCK => Ok(None),
            Some(line) => Ok(Some(line)),
            None => Err(self.error("block is missing its `.` terminator")),
        }
    }

    fn error(&self, reason: impl Into<String>) -> TrainerError {
        TrainerError::parse(&self.path, self.line, reason)
    }
}

/// Reads [`Utterance`]s from a frame batch. Each row is one frame of
/// whitespace-separated numbers; every frame of a block has the same width.
pub struct FrameReader<R> {
    blocks: Blocks<R>,
}

impl FrameReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(open(path)?, path))
    }
}

impl<R: BufRead> FrameReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            blocks: Blocks::new(reader, path.into()),
        }
    }

    pub fn next_utterance(&mut self) -> Result<Option<Utterance>> {
        let Some(name) = self.blocks.header()? else {
            return Ok(None);
        };

        let mut values = Vec::new();
        let mut dim = None;
        let mut rows = 0;
        while let Some(row) = self.blocks.row()? {
            let start = values.len();
            for field in row.split_whitespace() {
                let v: f64 = field
                    .parse()
                    .map_err(|_| self.blocks.error(format!("`{field}` is not a number")))?;
                values.push(v);
            }
            let width = values.len() - start;
            match dim {
                None => dim = Some(width),
                Some(d) if d != width => {
                    return Err(self
                        .blocks
                        .error(format!("frame has {width} values, expected {d}")));
                }
                Some(_) => {}
            }
            rows += 1;
        }

        let frames = Array2::from_shape_vec((rows, dim.unwrap_or(0)), values)
            .map_err(|e| self.blocks.error(e.to_string()))?;
        debug!(utterance = %name, frames = rows, "read frames");
        Ok(Some(Utterance { name, frames }))
    }
}

impl<R: BufRead> Iterator for FrameReader<R> {
    type Item = Result<Utterance>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_utterance().transpose()
    }
}

/// Reads [`Transcript`]s from a segment batch of `start end label` rows.
///
/// Times can be divided by a subsampling factor to match subsampled frames;
/// segments that collapse to zero length are dropped.
pub struct SegmentReader<R> {
    blocks: Blocks<R>,
    subsample: i64,
}

impl SegmentReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::new(open(path)?, path))
    }
}

impl<R: BufRead> SegmentReader<R> {
    pub fn new(reader: R, path: impl Into<PathBuf>) -> Self {
        Self {
            blocks: Blocks::new(reader, path.into()),
            subsample: 1,
        }
    }

    pub fn with_subsample(mut self, factor: usize) -> Self {
        self.subsample = factor.max(1) as i64;
        self
    }

    fn time(&self, field: &str) -> Result<i64> {
        let t: i64 = field
            .parse()
            .map_err(|_| self.blocks.error(format!("`{field}` is not a time")))?;
        if self.subsample == 1 {
            return Ok(t);
        }
        Ok((t as f64 / self.subsample as f64).round_ties_even() as i64)
    }

    pub fn next_transcript(&mut self) -> Result<Option<Transcript>> {
        let Some(name) = self.blocks.header()? else {
            return Ok(None);
        };

        let mut segments = Vec::new();
        while let Some(row) = self.blocks.row()? {
            let fields: Vec<&str> = row.split_whitespace().collect();
            let [start, end, label] = fields[..] else {
                return Err(self
                    .blocks
                    .error(format!("expected `start end label`, found `{}`", row.trim())));
            };
            let (start, end) = (self.time(start)?, self.time(end)?);
            if start == end {
                debug!(utterance = %name, start, label, "dropping empty segment");
                continue;
            }
            let seg = Segment::new(start, end, label).map_err(|e| self.blocks.error(e.to_string()))?;
            segments.push(seg);
        }

        Ok(Some(Transcript { name, segments }))
    }
}

impl<R: BufRead> Iterator for SegmentReader<R> {
    type Item = Result<Transcript>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_transcript().transpose()
    }
}

/// Pair up a frame batch with a segment batch, block by block.
pub fn load_examples<P: AsRef<Path>, Q: AsRef<Path>>(
    frames: P,
    segments: Q,
    subsample: usize,
) -> Result<Vec<Example>> {
    let mut frame_reader = FrameReader::open(frames)?;
    let mut segment_reader = SegmentReader::open(segments)?.with_subsample(subsample);

    let mut examples = Vec::new();
    loop {
        match (frame_reader.next_utterance()?, segment_reader.next_transcript()?) {
            (Some(utt), Some(tr)) => {
                if utt.name != tr.name {
                    return Err(TrainerError::Mismatch(format!(
                        "frames for `{}` paired with segments for `{}`",
                        utt.name, tr.name
                    )));
                }
                examples.push(Example {
                    name: utt.name,
                    frames: utt.frames,
                    segments: tr.segments,
                });
            }
            (None, None) => break,
            (Some(utt), None) => {
                return Err(TrainerError::Mismatch(format!(
                    "no segments for `{}`",
                    utt.name
                )));
            }
            (None, Some(tr)) => {
                return Err(TrainerError::Mismatch(format!("no frames for `{}`", tr.name)));
            }
        }
    }

    debug!(examples = examples.len(), "loaded examples");
    Ok(examples)
}

/// Load a label list, one label per line.
pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<LabelSet> {
    let path = path.as_ref();
    let mut labels = LabelSet::new();
    for (i, line) in open(path)?.lines().enumerate() {
        let line = line.map_err(|e| TrainerError::io(path, e))?;
        let label = line.trim();
        if label.is_empty() {
            continue;
        }
        if labels.id(label).is_some() {
            return Err(TrainerError::parse(
                path,
                i + 1,
                format!("label `{label}` listed twice"),
            ));
        }
        labels.insert(label);
    }
    Ok(labels)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ArpaSection {
    Preamble,
    Data,
    Order(usize),
    End,
}

/// Load the unigram and bigram sections of an ARPA language model into a
/// back-off bigram automaton. Log-probabilities are converted from base 10
/// to natural logarithms; higher orders are ignored.
pub fn load_arpa_bigram<P: AsRef<Path>>(path: P) -> Result<LanguageModel> {
    let path = path.as_ref();
    let mut section = ArpaSection::Preamble;
    let mut unigrams: Vec<(String, f64)> = Vec::new();
    let mut bigrams: Vec<(String, String, f64)> = Vec::new();
    let mut backoffs: Vec<(String, f64)> = Vec::new();

    for (i, line) in open(path)?.lines().enumerate() {
        let line = line.map_err(|e| TrainerError::io(path, e))?;
        let line = line.trim();
        let lineno = i + 1;
        if line.is_empty() {
            continue;
        }

        if line.starts_with('\\') {
            section = match line {
                "\\data\\" => ArpaSection::Data,
                "\\end\\" => ArpaSection::End,
                _ => {
                    let order = line
                        .strip_prefix('\\')
                        .and_then(|s| s.strip_suffix("-grams:"))
                        .and_then(|n| n.parse().ok())
                        .ok_or_else(|| {
                            TrainerError::parse(path, lineno, format!("unknown section `{line}`"))
                        })?;
                    ArpaSection::Order(order)
                }
            };
            continue;
        }

        let parse = |s: &str| -> Result<f64> {
            s.parse::<f64>()
                .map(|v| v * LN_10)
                .map_err(|_| TrainerError::parse(path, lineno, format!("`{s}` is not a number")))
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        match section {
            ArpaSection::Preamble | ArpaSection::Data | ArpaSection::End => {}
            ArpaSection::Order(1) => match fields[..] {
                [logp, word] => unigrams.push((word.to_string(), parse(logp)?)),
                [logp, word, backoff] => {
                    unigrams.push((word.to_string(), parse(logp)?));
                    backoffs.push((word.to_string(), parse(backoff)?));
                }
                _ => return Err(TrainerError::parse(path, lineno, "malformed unigram")),
            },
            ArpaSection::Order(2) => match fields[..] {
                [logp, history, word] | [logp, history, word, _] => {
                    bigrams.push((history.to_string(), word.to_string(), parse(logp)?));
                }
                _ => return Err(TrainerError::parse(path, lineno, "malformed bigram")),
            },
            ArpaSection::Order(_) => {}
        }
    }

    if section != ArpaSection::End {
        debug!(path = %path.display(), "ARPA file has no \\end\\ marker");
    }
    debug!(
        unigrams = unigrams.len(),
        bigrams = bigrams.len(),
        "read ARPA model"
    );
    Ok(LanguageModel::bigram(&unigrams, &bigrams, &backoffs)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn write(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_frame_blocks() {
        let text = "utt1\n0 1\n2 3\n4 5\n.\nutt2\n1.5 -2\n.\n";
        let mut reader = FrameReader::new(Cursor::new(text), "frames");

        let first = reader.next_utterance().unwrap().unwrap();
        assert_eq!(first.name, "utt1");
        assert_eq!(first.frames.dim(), (3, 2));
        assert_eq!(first.frames[[2, 1]], 5.0);

        let second = reader.next_utterance().unwrap().unwrap();
        assert_eq!(second.frames[[0, 1]], -2.0);
        assert!(reader.next_utterance().unwrap().is_none());
    }

    #[test]
    fn ragged_frames_are_rejected() {
        let text = "utt1\n0 1\n2\n.\n";
        let err = FrameReader::new(Cursor::new(text), "frames")
            .next_utterance()
            .unwrap_err();
        assert!(matches!(err, TrainerError::Parse { line: 3, .. }));
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let text = "utt1\n0 1\n";
        assert!(FrameReader::new(Cursor::new(text), "frames").next().unwrap().is_err());
    }

    #[test]
    fn reads_segments_with_subsampling() {
        let text = "utt1\n0 30 sil\n30 90 a\n90 92 b\n.\n";
        let mut reader = SegmentReader::new(Cursor::new(text), "segs").with_subsample(4);
        let tr = reader.next_transcript().unwrap().unwrap();

        // 30/4 = 7.5 -> 8, 90/4 = 22.5 -> 22, 92/4 = 23
        let bounds: Vec<(i64, i64)> = tr.segments.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 8), (8, 22), (22, 23)]);
    }

    #[test]
    fn bad_segment_row_is_rejected() {
        let text = "utt1\n0 3\n.\n";
        let err = SegmentReader::new(Cursor::new(text), "segs")
            .next_transcript()
            .unwrap_err();
        assert!(matches!(err, TrainerError::Parse { line: 2, .. }));

        let text = "utt1\n5 3 a\n.\n";
        assert!(SegmentReader::new(Cursor::new(text), "segs").next().unwrap().is_err());
    }

    #[test]
    fn examples_pair_by_name() {
        let frames = write("u1\n0\n1\n.\nu2\n0\n.\n");
        let segs = write("u1\n0 2 a\n.\nu2\n0 1 b\n.\n");
        let examples = load_examples(frames.path(), segs.path(), 1).unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].segments[0].label, "b");

        let shuffled = write("u2\n0 1 b\n.\nu1\n0 2 a\n.\n");
        assert!(matches!(
            load_examples(frames.path(), shuffled.path(), 1),
            Err(TrainerError::Mismatch(_))
        ));
    }

    #[test]
    fn loads_label_list() {
        let file = write("sil\na\n\nb\n");
        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels.labels().collect::<Vec<_>>(), vec!["sil", "a", "b"]);

        let dup = write("a\nb\na\n");
        assert!(matches!(
            load_labels(dup.path()),
            Err(TrainerError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn loads_arpa_bigram() {
        let file = write(
            "\\data\\\nngram 1=4\nngram 2=2\n\n\\1-grams:\n-99 <s> -0.5\n-1 </s>\n-0.5 a -0.25\n-0.7 b\n\n\\2-grams:\n-0.1 <s> a\n-0.2 a b\n\n\\end\\\n",
        );
        let lm = load_arpa_bigram(file.path()).unwrap();
        // null history plus one state per word, in unigram order
        assert_eq!(lm.vertex_count(), 5);

        let a = 3;
        assert_eq!(lm.history(a), "a");
        let to_b = lm.out_edges_labeled(a, "b");
        assert_eq!(to_b.len(), 1);
        assert_relative_eq!(lm.edge(to_b[0]).weight, -0.2 * LN_10, epsilon = 1e-12);
    }

    #[test]
    fn arpa_without_sentence_markers_fails() {
        let file = write("\\data\\\n\\1-grams:\n-1 a\n\\end\\\n");
        assert!(matches!(
            load_arpa_bigram(file.path()),
            Err(TrainerError::Core(_))
        ));
    }
}
