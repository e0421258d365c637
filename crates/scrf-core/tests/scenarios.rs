//! End-to-end decoding and loss scenarios on lattices and composed graphs.

use approx::assert_relative_eq;

use scrf_core::fst::ComposedVertex;
use scrf_core::search::{check_agreement, is_topological};
use scrf_core::{
    ANY, ComposedFst, CompositeScore, DEFAULT_STRUCTURAL_LABELS, EPSILON, ForwardBackward,
    FstWeight, HingeLoss, LanguageModel, Lattice, LogLoss, Loss, LossConfig, LossKind, OneBest,
    OverlapCost, ScrfError, Segment, SegmentationConfig, TopoOrder, Trellis, make_loss,
    min_cost_path, overlap_cost, segmentation_lattice, shortest_path,
};

fn seg(start: i64, end: i64, label: &str) -> Segment {
    Segment::new(start, end, label).unwrap()
}

fn toy_bigram() -> LanguageModel {
    LanguageModel::bigram(
        &[("<s>", -99.0), ("</s>", -1.0), ("a", -0.5), ("b", -0.9)],
        &[("<s>", "a", -0.1), ("a", "b", -0.2), ("b", "</s>", -0.3)],
        &[("<s>", -0.7), ("a", -0.4), ("b", -0.6)],
    )
    .unwrap()
}

fn wildcard_lattice(frames: usize, max_seg: usize) -> Lattice {
    let cfg = SegmentationConfig::default().with_max_seg(max_seg);
    let mut lat = segmentation_lattice(frames, &cfg, &[ANY]).unwrap();
    lat.add_eps_loops();
    lat
}

#[test]
fn three_vertex_reference_has_zero_cost_and_zero_hinge() {
    let mut lat = Lattice::new();
    let v0 = lat.add_vertex(0);
    let v1 = lat.add_vertex(1);
    let v2 = lat.add_vertex(2);
    lat.add_edge(v0, v1, EPSILON, "a", 0.5).unwrap();
    lat.add_edge(v1, v2, EPSILON, "b", 0.7).unwrap();
    lat.add_initial(v0).unwrap();
    lat.add_final(v2).unwrap();

    let reference = vec![seg(0, 1, "a"), seg(1, 2, "b")];
    let gold = min_cost_path(&lat, lat.topo_order().unwrap(), &reference, &DEFAULT_STRUCTURAL_LABELS)
        .unwrap();
    assert_eq!(gold.edges(), &[0, 1]);

    let cost = OverlapCost::from_path(&gold, &DEFAULT_STRUCTURAL_LABELS);
    assert_eq!(cost.cost(0, 1, "a"), 0.0);
    assert_eq!(cost.cost(1, 2, "b"), 0.0);

    let loss = HingeLoss::new(&lat, lat.time_order(), gold, &FstWeight, &cost, 1.0).unwrap();
    assert_relative_eq!(loss.value(), 0.0);
}

#[test]
fn segment_cost_at_full_and_zero_overlap() {
    let structural = DEFAULT_STRUCTURAL_LABELS
        .iter()
        .map(|s| s.to_string())
        .collect();
    let reference = vec![seg(0, 4, "a"), seg(4, 9, "b")];

    assert_eq!(overlap_cost(0, 4, "a", &reference, &structural), 0.0);
    assert_eq!(overlap_cost(4, 9, "b", &reference, &structural), 0.0);
    assert_eq!(overlap_cost(9, 12, "a", &reference, &structural), 3.0);
    assert_eq!(overlap_cost(9, 12, "zzz", &reference, &structural), 3.0);
}

#[test]
fn composed_decoding_ends_in_sentence_end() {
    let lat = wildcard_lattice(6, 3);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();

    let order = comp.topo_order().unwrap();
    assert!(is_topological(&comp, &order));

    let path = shortest_path(&comp, order, &FstWeight).unwrap();
    let labels = path.labels();
    assert_eq!(labels.last(), Some(&"</s>"));
    assert!(!labels.contains(&ANY));

    let segments = path.segments();
    assert_eq!(segments.first().map(|s| s.start), Some(0));
    assert_eq!(segments.last().map(|s| s.end), Some(6));
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

#[test]
fn forward_backward_and_decoder_agree_on_composed_graph() {
    let lat = wildcard_lattice(5, 2);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();
    let trellis = Trellis::new(&comp, comp.topo_order().unwrap(), &FstWeight);

    let fwd = OneBest::forward(&trellis);
    let bwd = OneBest::backward(&trellis);
    let (_, f) = fwd.best_final(&trellis).unwrap();
    let (_, b) = bwd.best_initial(&trellis).unwrap();
    let path = fwd.path(&trellis).unwrap();
    check_agreement(f, b, Some(path.weight())).unwrap();

    let fb = ForwardBackward::new(&trellis).unwrap();
    assert!(fb.log_partition() >= f);
}

#[test]
fn posterior_mass_is_conserved_through_internal_vertices() {
    let lat = wildcard_lattice(4, 2);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();
    let trellis = Trellis::new(&comp, comp.topo_order().unwrap(), &FstWeight);
    let fb = ForwardBackward::new(&trellis).unwrap();

    let mut inflow = vec![0.0; trellis.len()];
    let mut outflow = vec![0.0; trellis.len()];
    for (_, t, h, w) in trellis.edges() {
        let p = fb.posterior(t, h, w);
        outflow[t] += p;
        inflow[h] += p;
    }

    let initials = trellis.initial_positions();
    let finals = trellis.final_positions();
    let out_of_start: f64 = initials.iter().map(|&i| outflow[i]).sum();
    assert_relative_eq!(out_of_start, 1.0, epsilon = 1e-9);

    for i in 0..trellis.len() {
        assert!(outflow[i] <= 1.0 + 1e-9);
        if !initials.contains(&i) && !finals.contains(&i) {
            assert_relative_eq!(inflow[i], outflow[i], epsilon = 1e-9);
        }
    }
}

#[test]
fn losses_are_non_negative_on_composed_graph() {
    let lat = wildcard_lattice(6, 3);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();
    let reference = vec![seg(0, 2, "a"), seg(2, 4, "b"), seg(4, 6, "</s>")];
    let score: CompositeScore<'_, ComposedFst<'_>> = CompositeScore::new().with(FstWeight);

    for kind in [LossKind::Hinge, LossKind::Log, LossKind::Filtering] {
        let config = LossConfig::default().with_kind(kind);
        let order = comp.topo_order().unwrap();
        let gold = min_cost_path(&comp, order.clone(), &reference, &config.structural_labels)
            .unwrap();
        assert_eq!(gold.segments(), reference);

        let cost = OverlapCost::from_path(&gold, &config.structural_labels);
        let loss = make_loss(&config, &comp, order, gold, &score, &cost).unwrap();
        assert!(loss.value() >= -1e-9, "{kind} loss {}", loss.value());
        loss.accumulate_grad();
    }
}

#[test]
fn log_loss_exceeds_hinge_without_cost() {
    let lat = wildcard_lattice(4, 2);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();
    let order = comp.topo_order().unwrap();
    let reference = vec![seg(0, 2, "a"), seg(2, 4, "</s>")];
    let gold = min_cost_path(&comp, order.clone(), &reference, &DEFAULT_STRUCTURAL_LABELS).unwrap();
    let cost = OverlapCost::from_path(&gold, &DEFAULT_STRUCTURAL_LABELS);

    let hinge = HingeLoss::new(&comp, order.clone(), gold.clone(), &FstWeight, &cost, 0.0).unwrap();
    let log = LogLoss::new(&comp, order, gold, &FstWeight, &cost, 0.0).unwrap();
    assert!(log.value() >= hinge.value());
}

#[test]
fn disconnected_lattice_reports_no_path() {
    let mut lat = Lattice::new();
    let v0 = lat.add_vertex(0);
    let v1 = lat.add_vertex(3);
    lat.add_initial(v0).unwrap();
    lat.add_final(v1).unwrap();

    let err = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap_err();
    assert!(matches!(err, ScrfError::NoPath));
    assert!(err.is_per_example());
}

#[test]
fn lattice_without_final_is_malformed() {
    let mut lat = Lattice::new();
    let v0 = lat.add_vertex(0);
    lat.add_initial(v0).unwrap();
    let lm = LanguageModel::unigram(&["a"]).unwrap();

    assert!(matches!(lat.topo_order(), Err(ScrfError::MalformedInput(_))));
    assert!(matches!(
        ComposedFst::new(&lat, &lm),
        Err(ScrfError::MalformedInput(_))
    ));
}

#[test]
fn composed_vertices_pair_lattice_and_lm_states() {
    let lat = wildcard_lattice(2, 2);
    let lm = toy_bigram();
    let comp = ComposedFst::new(&lat, &lm).unwrap();
    let order = comp.topo_order().unwrap();

    let start: ComposedVertex = order[0];
    assert_eq!(start.lattice, 0);
    assert_eq!(lm.history(start.lm), "<s>");
    assert!(order.iter().all(|v| v.lattice < lat.vertex_count()));
}
