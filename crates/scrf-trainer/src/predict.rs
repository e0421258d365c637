//! Decoding utterances with trained parameters.

use scrf_core::search::TopoOrder;
use scrf_core::{
    FeatureKind, LabelSet, LanguageModel, Segment, SegmentationConfig, TimedFst,
    make_linear_score, shortest_path,
};
use tracing::debug;

use crate::config::TrainConfig;
use crate::data::Utterance;
use crate::error::Result;
use crate::graph::{GraphVisitor, with_graph};
use crate::params::{ParamSet, param_specs};

pub struct Predictor {
    kinds: Vec<FeatureKind>,
    labels: LabelSet,
    lm: Option<LanguageModel>,
    params: ParamSet,
    segmentation: SegmentationConfig,
}

impl Predictor {
    /// `params` must hold every parameter the configured features need for
    /// frames of width `frame_dim`.
    pub fn new(
        config: &TrainConfig,
        labels: LabelSet,
        lm: Option<LanguageModel>,
        params: ParamSet,
        frame_dim: usize,
    ) -> Result<Self> {
        config.segmentation.validate()?;
        let kinds = config.feature_kinds()?;
        let specs = param_specs(
            &kinds,
            labels.len(),
            frame_dim,
            config.segmentation.max_seg,
        );
        params.check(&specs)?;

        Ok(Self {
            kinds,
            labels,
            lm,
            params,
            segmentation: config.segmentation.clone(),
        })
    }

    /// Best segmentation of `utt`. An utterance without frames has none.
    pub fn predict(&self, utt: &Utterance) -> Result<Vec<Segment>> {
        let frames = utt.frames.nrows();
        if frames == 0 {
            return Ok(Vec::new());
        }
        let segments = with_graph(
            frames,
            &self.segmentation,
            &self.labels,
            self.lm.as_ref(),
            Decode {
                predictor: self,
                utt,
            },
        )?;
        debug!(utterance = %utt.name, segments = segments.len(), "decoded");
        Ok(segments)
    }
}

struct Decode<'p> {
    predictor: &'p Predictor,
    utt: &'p Utterance,
}

impl GraphVisitor for Decode<'_> {
    type Output = Vec<Segment>;

    fn visit<F: TimedFst + TopoOrder>(self, graph: &F) -> Result<Vec<Segment>> {
        let p = self.predictor;
        let score = make_linear_score(
            &p.kinds,
            p.params.as_map(),
            self.utt.frames.view(),
            &p.labels,
            p.segmentation.max_seg,
        )?;
        let order = graph.topo_order()?;
        let path = shortest_path(graph, order, &score)?;
        Ok(path.segments())
    }
}

/// One line of decoder output: the labels, then the utterance name in
/// parentheses.
pub fn format_prediction(name: &str, segments: &[Segment]) -> String {
    let mut line = String::new();
    for seg in segments {
        line.push_str(&seg.label);
        line.push(' ');
    }
    line.push('(');
    line.push_str(name);
    line.push(')');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn labels() -> LabelSet {
        LabelSet::from_labels(["a", "b"]).unwrap()
    }

    fn config() -> TrainConfig {
        TrainConfig::default()
            .with_features("frame-avg")
            .with_segmentation(SegmentationConfig::default().with_max_seg(3))
    }

    /// `a` fires on column 0, `b` on column 1.
    fn params() -> ParamSet {
        let mut params = ParamSet::new();
        params.insert("frame-avg", array![[1.0, -1.0], [-1.0, 1.0]]);
        params
    }

    #[test]
    fn decodes_frame_patterns() {
        let predictor = Predictor::new(&config(), labels(), None, params(), 2).unwrap();
        let utt = Utterance {
            name: "u1".to_string(),
            frames: array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]],
        };
        let segments = predictor.predict(&utt).unwrap();

        // frame-avg rewards one segment per frame, each scoring 1
        assert_eq!(scrf_core::segment::labels(&segments), vec!["a", "a", "b", "b"]);
        assert_eq!(segments.last().map(|s| s.end), Some(4));
    }

    #[test]
    fn empty_utterance_has_no_segments() {
        let predictor = Predictor::new(&config(), labels(), None, params(), 2).unwrap();
        let utt = Utterance {
            name: "empty".to_string(),
            frames: Array2::zeros((0, 2)),
        };
        assert!(predictor.predict(&utt).unwrap().is_empty());
    }

    #[test]
    fn rejects_params_of_wrong_width() {
        assert!(Predictor::new(&config(), labels(), None, params(), 3).is_err());
    }

    #[test]
    fn formats_labels_then_name() {
        let segments = vec![
            Segment::new(0, 2, "a").unwrap(),
            Segment::new(2, 3, "b").unwrap(),
        ];
        assert_eq!(format_prediction("u7", &segments), "a b (u7)");
        assert_eq!(format_prediction("u8", &[]), "(u8)");
    }
}
