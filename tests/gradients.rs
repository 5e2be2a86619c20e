use briny_net::approx::{check_gradient, GRADIENT_TOLERANCE};
use briny_net::backprop::ActivationFn;
use briny_net::blocks::*;
use briny_net::network::Network;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn random_weights(net: &Network, seed: u64) -> Vec<f64> {
    let mut w = vec![0.0; net.weight_count()];
    net.init_weights(&mut StdRng::seed_from_u64(seed), &mut w).unwrap();
    w
}

fn assert_gradients(net: &mut Network, weights: &[f64], input: &[f64]) {
    let err = check_gradient(net, weights, input).unwrap();
    assert!(
        err < GRADIENT_TOLERANCE,
        "gradient discrepancy {err:e} in\n{}",
        net.describe(None).unwrap()
    );
}

/// Overwrites the weights of layer `index` with `values`.
fn set_layer_weights(net: &Network, weights: &mut [f64], index: usize, values: &[f64]) {
    let start = net.layer_start(index).unwrap();
    let end = net.layer_start(index + 1).unwrap();
    assert_eq!(end - start, values.len());
    weights[start..end].copy_from_slice(values);
}

#[test]
fn test_linear_and_tanh() {
    let mut net = Network::new();
    net.add(Linear::new(3, 5)).unwrap();
    net.add(Activation::tanh(5)).unwrap();
    net.add(Linear::new(5, 2)).unwrap();
    let w = random_weights(&net, 0);
    assert_gradients(&mut net, &w, &[0.3, -0.7, 1.1]);
}

#[test]
fn test_every_activation_function() {
    for (seed, function) in ActivationFn::ALL.into_iter().enumerate() {
        let mut net = Network::new();
        net.add(Linear::new(2, 4)).unwrap();
        net.add(Activation::new(function, 4)).unwrap();
        net.add(Linear::new(4, 2)).unwrap();
        let w = random_weights(&net, seed as u64);
        assert_gradients(&mut net, &w, &[0.8, -0.45]);
    }
}

#[test]
fn test_tempered_linear() {
    let mut net = Network::new();
    net.add(TemperedLinear::new(3, 3, 100.0, 0.01)).unwrap();
    net.add(Activation::tanh(3)).unwrap();
    let w = random_weights(&net, 1);
    assert_gradients(&mut net, &w, &[0.5, 0.25, -1.0]);
}

#[test]
fn test_hinge() {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(Hinge::new(3)).unwrap();
    let mut w = random_weights(&net, 2);
    set_layer_weights(&net, &mut w, 1, &[0.3, -0.5, 0.8, 0.2, 0.5, 0.1]);
    assert_gradients(&mut net, &w, &[1.2, -0.4]);
}

#[test]
fn test_elbow() {
    let mut net = Network::new();
    net.add(Elbow::new(3)).unwrap();
    let w = vec![0.5, -0.7, 0.3];
    assert_gradients(&mut net, &w, &[-1.2, 0.8, 0.4]);
}

#[test]
fn test_leaky_tanh() {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(LeakyTanh::new(3)).unwrap();
    let mut w = random_weights(&net, 3);
    set_layer_weights(&net, &mut w, 1, &[0.2, 0.5, 0.9]);
    assert_gradients(&mut net, &w, &[0.6, -1.3]);
}

#[test]
fn test_soft_exp_in_both_regimes() {
    let mut net = Network::new();
    net.add(SoftExp::new(3, 0.4)).unwrap();
    let w = vec![0.5, -0.3, 0.2];
    assert_gradients(&mut net, &w, &[0.9, 0.8, -0.6]);
}

#[test]
fn test_running_normalizer() {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(RunningNormalizer::new(3, 10.0)).unwrap();
    net.add(Activation::tanh(3)).unwrap();
    let mut w = random_weights(&net, 4);
    // [sum, sum of squares, gain, shift] per unit, away from the fresh statistics
    #[rustfmt::skip]
    let stats = [
        2.0, 14.0, 0.8, 0.1,
        -1.0, 6.0, 1.3, -0.2,
        0.5, 3.0, 0.6, 0.4,
    ];
    set_layer_weights(&net, &mut w, 1, &stats);
    assert_gradients(&mut net, &w, &[0.4, 0.9]);
}

#[test]
fn test_cat_in() {
    let mut net = Network::new();
    net.add(CatIn::new(4, 3)).unwrap();
    net.add(Linear::new(3, 2)).unwrap();
    net.add(Activation::tanh(2)).unwrap();
    let w = random_weights(&net, 8);
    // the selected row is constant on either side of the input
    assert_gradients(&mut net, &w, &[2.5]);
    assert_gradients(&mut net, &w, &[0.5]);
}

#[test]
fn test_single_channel_convolution() {
    let mut net = Network::new();
    net.add(Conv::new(vec![4, 4], vec![3, 3], vec![4, 4]).unwrap()).unwrap();
    let w = random_weights(&net, 0);
    let x: Vec<f64> = (0..16).map(|i| ((i * 7) % 11) as f64 / 5.0 - 1.0).collect();
    assert_gradients(&mut net, &w, &x);
}

#[test]
fn test_stacked_multi_channel_convolution() {
    let mut net = Network::new();
    net.add(Conv::new(vec![4, 4], vec![3, 3, 2], vec![4, 4, 2]).unwrap()).unwrap();
    net.add(Activation::new(ActivationFn::LeakyRectifier, 32)).unwrap();
    net.add(Conv::new(vec![4, 4, 2], vec![3, 3, 2], vec![4, 4]).unwrap()).unwrap();
    net.add(Activation::new(ActivationFn::LeakyRectifier, 16)).unwrap();
    let w = random_weights(&net, 123);
    let x: Vec<f64> = (0..16).map(|i| ((i * 5) % 13) as f64 / 6.0 - 1.0).collect();
    assert_gradients(&mut net, &w, &x);
}

#[test]
fn test_max_pooling_routes_to_winners() {
    let mut net = Network::new();
    net.add(Linear::new(4, 16)).unwrap();
    net.add(MaxPooling2D::new(4, 2, 2).unwrap()).unwrap();
    let w = random_weights(&net, 5);
    assert_gradients(&mut net, &w, &[0.7, -0.2, 0.4, 1.0]);
}

#[test]
fn test_hypercube_edges_both_directions() {
    let mut net = Network::new();
    net.add(HypercubeEdges::new(3, 5)).unwrap();
    net.add(Activation::tanh(5)).unwrap();
    net.add(HypercubeEdges::new(5, 2)).unwrap();
    let w = random_weights(&net, 6);
    assert_gradients(&mut net, &w, &[0.2, -0.9, 0.5]);
}

#[test]
fn test_routing_blocks() {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(Repeater::new(3, 8)).unwrap();
    net.add(Spreader::new(8, 3)).unwrap();
    net.add(ScalarProduct::new(4)).unwrap();
    net.add(Repeater::new(4, 6)).unwrap();
    net.add(Switch::new(2)).unwrap();
    let w = random_weights(&net, 7);
    assert_gradients(&mut net, &w, &[0.35, -0.6]);
}

#[test]
fn test_scalar_sum_and_spectral() {
    let mut net = Network::new();
    net.add(Linear::new(2, 2)).unwrap();
    net.add(ScalarSum::new(1)).unwrap();
    net.add(Spectral::new(0.5, 4.0, 6, false).unwrap()).unwrap();
    net.add(Linear::new(6, 2)).unwrap();
    let w = random_weights(&net, 8);
    assert_gradients(&mut net, &w, &[0.1, 0.45]);
}

#[test]
fn test_parallel_blocks_in_one_layer() {
    let mut net = Network::new();
    net.add(Linear::new(3, 4)).unwrap();
    net.add(Activation::tanh(2)).unwrap();
    net.concat(LeakyTanh::new(2), 2).unwrap();
    net.concat(Linear::new(4, 2), 0).unwrap();
    net.add(Linear::new(6, 1)).unwrap();
    let mut w = random_weights(&net, 9);
    let start = net.layer_start(1).unwrap();
    w[start..start + 2].copy_from_slice(&[0.3, 0.6]);
    assert_gradients(&mut net, &w, &[0.5, 0.2, -0.8]);
}

#[test]
fn test_lstm_single_step() {
    let mut net = Network::new();
    net.add(Lstm::new(2, 3)).unwrap();
    net.add(Linear::new(3, 2)).unwrap();
    let w = random_weights(&net, 10);
    assert_gradients(&mut net, &w, &[0.4, -0.3]);
}

#[test]
fn test_lstm_through_time() {
    let mut net = Network::new();
    net.add(Lstm::new(2, 3)).unwrap();
    net.add(Linear::new(3, 1)).unwrap();
    let w = random_weights(&net, 11);
    for x in [[0.9, -0.1], [0.2, 0.5]] {
        net.forward_prop(&w, &x).unwrap();
        net.advance_state(3);
    }
    assert_gradients(&mut net, &w, &[-0.6, 0.3]);
}

#[test]
fn test_soft_max_blame_is_cross_entropy_gradient() {
    let mut net = Network::new();
    net.add(SoftMax::new(4)).unwrap();
    let z = [0.3, -1.2, 0.8, 0.05];
    let target = [0.0, 0.0, 1.0, 0.0];
    let cross_entropy = |net: &mut Network, z: &[f64]| -> f64 {
        let y = net.forward_prop(&[], z).unwrap();
        -target.iter().zip(y).map(|(t, y)| t * y.ln()).sum::<f64>()
    };

    net.forward_prop(&[], &z).unwrap();
    net.compute_blame(&target).unwrap();
    let mut in_blame = [0.0; 4];
    net.backpropagate(&[], Some(&mut in_blame)).unwrap();

    let eps = 1e-6;
    for j in 0..4 {
        let mut hi = z;
        hi[j] += eps;
        let mut lo = z;
        lo[j] -= eps;
        let numeric = (cross_entropy(&mut net, &hi) - cross_entropy(&mut net, &lo)) / (2.0 * eps);
        assert!((in_blame[j] + numeric).abs() < 1e-6, "unit {j}: {} vs {}", in_blame[j], -numeric);
    }
}
