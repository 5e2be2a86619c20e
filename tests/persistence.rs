use briny_net::backprop::ActivationFn;
use briny_net::blocks::*;
use briny_net::config::{default_blame_floor, NetConfig, StepConfig};
use briny_net::modelio::{load_network, load_weights, save_network, save_vectors, save_weights};
use briny_net::network::Network;
use briny_net::tensors::{fill_normal, WithGrad};
use briny_net::NetError;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("briny_net_{}_{name}", std::process::id()))
}

fn assert_same_outputs(a: &mut Network, wa: &[f64], b: &mut Network, wb: &[f64], inputs: &[Vec<f64>]) {
    for x in inputs {
        let ya = a.forward_prop(wa, x).unwrap().to_vec();
        let yb = b.forward_prop(wb, x).unwrap();
        assert_eq!(ya.len(), yb.len());
        for (p, q) in ya.iter().zip(yb) {
            assert!((p - q).abs() < 1e-9, "{p} != {q}");
        }
    }
}

fn tanh_stack() -> (Network, Vec<f64>) {
    let mut net = Network::new();
    net.add(Linear::new(1, 3)).unwrap();
    net.add(Activation::tanh(3)).unwrap();
    net.add(Linear::new(3, 2)).unwrap();
    net.add(Activation::tanh(2)).unwrap();
    net.add(Linear::new(2, 1)).unwrap();
    net.add(Activation::tanh(1)).unwrap();
    let mut w = vec![0.0; net.weight_count()];
    fill_normal(&mut StdRng::seed_from_u64(0), &mut w, 0.3);
    (net, w)
}

/// Conv, pooling, tempered, parallel, normalizer, sparse and recurrent blocks.
fn mixed_stack() -> (Network, Vec<f64>) {
    let mut net = Network::new();
    net.add(Conv::new(vec![4, 4], vec![3, 3, 2], vec![4, 4, 2]).unwrap()).unwrap();
    net.add(MaxPooling2D::new(4, 4, 2).unwrap()).unwrap();
    net.add(TemperedLinear::new(8, 4, 0.5, 0.1)).unwrap();
    net.add(Hinge::new(2)).unwrap();
    net.concat(SoftExp::new(2, 0.3), 2).unwrap();
    net.add(RunningNormalizer::new(4, 8.0)).unwrap();
    net.add(Spreader::new(4, 2)).unwrap();
    net.add(HypercubeEdges::new(4, 3)).unwrap();
    net.add(Lstm::new(3, 2)).unwrap();
    net.add(Linear::new(2, 4)).unwrap();
    net.add(ScalarProduct::new(2)).unwrap();
    net.add(Activation::new(ActivationFn::SoftPlus, 2)).unwrap();

    let mut w = vec![0.0; net.weight_count()];
    net.init_weights(&mut StdRng::seed_from_u64(1), &mut w).unwrap();
    for (i, x) in w.iter_mut().enumerate() {
        *x += 0.01 * (i as f64).sin();
    }
    let mut params = WithGrad::zeroed(w, net.grad_count());
    let config = StepConfig {
        learning_rate: 0.01,
        momentum: 0.5,
    };
    for k in 0..5 {
        let x: Vec<f64> = (0..16).map(|i| ((i + k) % 5) as f64 / 4.0).collect();
        net.train_step(&mut params, &x, &[0.3, 0.7], &config).unwrap();
    }
    (net, params.value)
}

/// Categorical, spectral, gating and soft-max blocks.
fn routing_stack() -> (Network, Vec<f64>) {
    let mut net = Network::new();
    net.add(CatIn::new(5, 4)).unwrap();
    net.add(Elbow::new(4)).unwrap();
    net.add(LeakyTanh::new(4)).unwrap();
    net.add(Repeater::new(4, 6)).unwrap();
    net.add(Switch::new(2)).unwrap();
    net.add(ScalarSum::new(1)).unwrap();
    net.add(Spectral::new(0.5, 3.0, 4, true).unwrap()).unwrap();
    net.add(SoftMax::new(4)).unwrap();

    let mut w = vec![0.0; net.weight_count()];
    net.init_weights(&mut StdRng::seed_from_u64(2), &mut w).unwrap();
    for (i, x) in w.iter_mut().enumerate() {
        *x += 0.2 * (i as f64).cos();
    }
    (net, w)
}

#[test]
fn test_json_round_trip_reproduces_outputs() {
    let cases = [
        (tanh_stack(), vec![vec![0.5], vec![-1.5]]),
        (mixed_stack(), vec![(0..16).map(|i| i as f64 / 16.0).collect()]),
        (routing_stack(), vec![vec![0.0], vec![3.7], vec![4.0]]),
    ];
    for ((mut net, w), inputs) in cases {
        let json = net.to_json(Some(&w)).unwrap();
        let (mut copy, loaded) = Network::from_json(&json).unwrap();
        let loaded = loaded.expect("inline weights");
        assert_eq!(copy.describe(None).unwrap(), net.describe(None).unwrap());
        assert_eq!(copy.weight_count(), net.weight_count());
        assert_eq!(copy.grad_count(), net.grad_count());
        net.reset_state();
        assert_same_outputs(&mut net, &w, &mut copy, &loaded, &inputs);
    }
}

#[test]
fn test_tempered_moments_survive_round_trip() {
    let (net, w) = mixed_stack();
    let spec = net.to_spec(Some(&w)).unwrap();
    let moments = spec.layers[2].blocks[0].spec.clone();
    let BlockSpec::TemperedLinear { moment1, moment2, .. } = &moments else {
        panic!("expected a tempered linear block, got {moments:?}");
    };
    assert_eq!(moment1.len(), 4);
    assert!(moment2.iter().any(|&m| m > 0.0));

    let (copy, _) = Network::from_json(&net.to_json(None).unwrap()).unwrap();
    let reloaded = copy.to_spec(None).unwrap().layers[2].blocks[0].spec.clone();
    let BlockSpec::TemperedLinear { moment2: again, .. } = reloaded else {
        panic!("expected a tempered linear block");
    };
    for (a, b) in moment2.iter().zip(&again) {
        assert!((a - b).abs() < 1e-12);
    }
}

#[test]
fn test_unknown_block_tag_is_rejected() {
    let json = r#"{
        "layers": [
            { "blocks": [ { "type": "linear", "inpos": 0, "in": 2, "out": 2 } ] },
            { "blocks": [ { "type": "pal", "inpos": 0, "in": 2, "out": 2 } ] }
        ]
    }"#;
    match Network::from_json(json) {
        Err(NetError::UnknownBlock(tag)) => assert_eq!(tag, "pal"),
        other => panic!("expected an unknown block error, got {other:?}"),
    }
}

#[test]
fn test_declared_arity_must_match_block() {
    let json = r#"{
        "layers": [
            { "blocks": [ { "type": "linear", "inpos": 0, "in": 2, "out": 3 } ] },
            { "blocks": [ { "type": "hinge", "inpos": 0, "in": 3, "out": 2 } ] }
        ]
    }"#;
    assert!(matches!(Network::from_json(json), Err(NetError::ShapeMismatch { .. })));
}

#[test]
fn test_inline_weights_must_fit_topology() {
    let (net, w) = tanh_stack();
    let mut spec = net.to_spec(Some(&w)).unwrap();
    spec.weights.as_mut().unwrap().pop();
    assert!(matches!(Network::from_spec(&spec), Err(NetError::ShapeMismatch { .. })));
}

#[test]
fn test_config_is_persisted() {
    let mut net = Network::with_config(NetConfig { blame_floor: 0.0 });
    net.add(Linear::new(2, 2)).unwrap();
    let (copy, weights) = Network::from_json(&net.to_json(None).unwrap()).unwrap();
    assert_eq!(copy.config().blame_floor, 0.0);
    assert!(weights.is_none());

    let json = r#"{ "layers": [ { "blocks": [ { "type": "linear", "inpos": 0, "in": 2, "out": 2 } ] } ] }"#;
    let (fresh, _) = Network::from_json(json).unwrap();
    assert_eq!(fresh.config().blame_floor, default_blame_floor());
}

#[test]
fn test_topology_and_weight_files_zip_back_together() {
    let (mut net, w) = routing_stack();
    let topology = temp_path("routing.json");
    let weights = temp_path("routing.bpat");
    save_network(&topology, &net, None).unwrap();
    save_weights(&weights, &w).unwrap();

    let (mut copy, inline) = load_network(&topology).unwrap();
    assert!(inline.is_none());
    let loaded = load_weights(&weights).unwrap();
    assert_eq!(loaded, w);
    assert_same_outputs(&mut net, &w, &mut copy, &loaded, &[vec![1.0], vec![2.0]]);
}

#[test]
fn test_network_file_with_inline_weights() {
    let (mut net, w) = tanh_stack();
    let path = temp_path("tanh.json");
    save_network(&path, &net, Some(&w)).unwrap();
    let (mut copy, inline) = load_network(&path).unwrap();
    let inline = inline.expect("inline weights");
    assert_same_outputs(&mut net, &w, &mut copy, &inline, &[vec![0.5]]);
}

#[test]
fn test_weight_file_must_hold_one_vector() {
    let path = temp_path("two.bpat");
    save_vectors(&path, &[&[1.0, 2.0], &[3.0]]).unwrap();
    assert!(matches!(load_weights(&path), Err(NetError::Corrupt(_))));
}
