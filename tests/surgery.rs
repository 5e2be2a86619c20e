use briny_net::approx::approx_eq;
use briny_net::backprop::ActivationFn;
use briny_net::blocks::*;
use briny_net::network::Network;
use briny_net::NetError;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn six_layers() -> Network {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(Hinge::new(3)).unwrap();
    net.add(Linear::new(3, 3)).unwrap();
    net.add(Hinge::new(3)).unwrap();
    net.add(Linear::new(3, 2)).unwrap();
    net.add(Hinge::new(2)).unwrap();
    net
}

fn counting(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

fn trained(net: &Network, seed: u64) -> Vec<f64> {
    let mut w = vec![0.0; net.weight_count()];
    net.init_weights(&mut StdRng::seed_from_u64(seed), &mut w).unwrap();
    // move the hinges away from the identity
    for (i, x) in w.iter_mut().enumerate() {
        if *x == 0.0 {
            *x = 0.05 * (i % 7) as f64 - 0.15;
        }
    }
    w
}

fn outputs(net: &mut Network, weights: &[f64], inputs: &[[f64; 2]]) -> Vec<Vec<f64>> {
    inputs.iter().map(|x| net.forward_prop(weights, x).unwrap().to_vec()).collect()
}

const PROBES: [[f64; 2]; 4] = [[0.5, -0.25], [1.5, 2.0], [-3.0, 0.1], [0.0, 0.0]];

#[test]
fn test_decrement_width_removes_zero_columns() {
    let mut net = six_layers();
    #[rustfmt::skip]
    let w = vec![
        0.0, 1.0, 2.0,
        3.0, 4.0, 5.0,
        6.0, 7.0, 8.0,
        9.0, 10.0, 11.0, 12.0, 13.0, 14.0,
        15.0, 16.0, 17.0,
        18.0, 19.0, 20.0,
        0.0, 0.0, 0.0,
        24.0, 25.0, 26.0,
        27.0, 28.0, 29.0, 30.0, 31.0, 32.0,
        33.0, 34.0,
        35.0, 36.0,
        37.0, 38.0,
        0.0, 0.0,
        41.0, 42.0, 43.0, 44.0,
    ];
    let narrowed = net.decrement_width(&w, 0, 4).unwrap().expect("a removable unit");
    #[rustfmt::skip]
    let expected = vec![
        0.0, 2.0,
        3.0, 5.0,
        6.0, 8.0,
        9.0, 11.0, 12.0, 14.0,
        15.0, 16.0,
        18.0, 19.0,
        24.0, 25.0,
        27.0, 28.0, 30.0, 31.0,
        33.0, 34.0,
        35.0, 36.0,
        37.0, 38.0,
        41.0, 42.0, 43.0, 44.0,
    ];
    assert_eq!(narrowed, expected);
    assert_eq!(net.weight_count(), expected.len());
    assert_eq!(net.layer(2).unwrap().inputs(), 2);
    assert_eq!(net.outputs(), 2);
}

#[test]
fn test_decrement_width_declines_without_zero_column() {
    let mut net = six_layers();
    let mut w = counting(45);
    w[21..24].copy_from_slice(&[0.0, 22.0, 0.0]);
    w[39..41].copy_from_slice(&[0.0, 0.0]);
    assert_eq!(net.decrement_width(&w, 0, 4).unwrap(), None);
    assert_eq!(net.weight_count(), 45);
    assert_eq!(net.layer(1).unwrap().outputs(), 3);
}

#[test]
fn test_decrement_width_needs_single_block_layers() {
    let mut net = Network::new();
    net.add(Linear::new(2, 4)).unwrap();
    net.add(Activation::tanh(2)).unwrap();
    net.concat(Activation::tanh(2), 2).unwrap();
    net.add(Linear::new(4, 1)).unwrap();
    let w = vec![0.0; net.weight_count()];
    assert!(matches!(net.decrement_width(&w, 0, 2), Err(NetError::Topology(_))));
}

#[test]
fn test_drop_splices_weights() {
    let mut net = six_layers();
    let w = counting(45);
    let once = net.drop_layer(2, &w).unwrap();
    let twice = net.drop_layer(2, &once).unwrap();
    let mut expected = counting(15);
    expected.extend((33..45).map(|i| i as f64));
    assert_eq!(twice, expected);
    assert_eq!(net.layer_count(), 4);
}

#[test]
fn test_insert_identity_blocks() {
    let mut net = six_layers();
    let w = counting(45);
    let once = net.insert(4, Box::new(Linear::new(3, 3)), &w).unwrap();
    let twice = net.insert(5, Box::new(Hinge::new(3)), &once).unwrap();

    #[rustfmt::skip]
    let identities = [
        0.0, 0.0, 0.0,
        1.0, 0.0, 0.0,
        0.0, 1.0, 0.0,
        0.0, 0.0, 1.0,
        0.0, 0.0, 0.0, 0.1, 0.1, 0.1,
    ];
    let mut expected = counting(33);
    expected.extend(identities);
    expected.extend((33..45).map(|i| i as f64));
    assert_eq!(twice, expected);
    assert_eq!(net.layer_count(), 8);
}

#[test]
fn test_identity_insertion_preserves_outputs() {
    let mut net = six_layers();
    let mut w = trained(&net, 3);
    let before = outputs(&mut net, &w, &PROBES);

    w = net.insert(2, Box::new(Linear::new(3, 3)), &w).unwrap();
    w = net.insert(0, Box::new(Elbow::new(2)), &w).unwrap();
    w = net.insert(4, Box::new(LeakyTanh::new(3)), &w).unwrap();
    w = net.insert(net.layer_count(), Box::new(SoftExp::new(2, 0.5)), &w).unwrap();
    w = net.insert(2, Box::new(Activation::new(ActivationFn::Identity, 3)), &w).unwrap();
    assert_eq!(net.layer_count(), 11);

    let after = outputs(&mut net, &w, &PROBES);
    for (a, b) in before.iter().zip(&after) {
        assert!(approx_eq(&a[..], &b[..]), "{a:?} != {b:?}");
    }
}

#[test]
fn test_insert_rejects_non_identity_blocks() {
    let mut net = six_layers();
    let w = counting(45);
    let err = net.insert(2, Box::new(Activation::tanh(3)), &w).unwrap_err();
    assert!(matches!(err, NetError::Unsupported { .. }));
    let err = net.insert(2, Box::new(Linear::new(3, 2)), &w).unwrap_err();
    assert!(matches!(err, NetError::ShapeMismatch { .. }));
    assert_eq!(net.layer_count(), 6);
}

#[test]
fn test_widen_then_narrow_restores_weights() {
    let mut net = six_layers();
    let w: Vec<f64> = (1..=45).map(|i| i as f64).collect();
    let wide = net.increase_width(1, &w, 0, 2, &mut StdRng::seed_from_u64(4)).unwrap();
    assert_eq!(net.layer(0).unwrap().outputs(), 4);
    assert_eq!(net.layer(2).unwrap().inputs(), 4);
    assert_eq!(net.weight_count(), wide.len());

    let narrow = net.decrement_width(&wide, 0, 2).unwrap().expect("the new unit is removable");
    assert_eq!(narrow, w);
    assert_eq!(net.weight_count(), 45);
}

#[test]
fn test_widening_preserves_outputs() {
    let mut net = six_layers();
    let w = trained(&net, 5);
    let before = outputs(&mut net, &w, &PROBES);
    let wide = net.increase_width(2, &w, 2, 2, &mut StdRng::seed_from_u64(6)).unwrap();
    assert_eq!(net.layer(3).unwrap().outputs(), 5);
    let after = outputs(&mut net, &wide, &PROBES);
    for (a, b) in before.iter().zip(&after) {
        assert!(approx_eq(&a[..], &b[..]), "{a:?} != {b:?}");
    }
}

#[test]
fn test_widening_unsupported_block_leaves_network_intact() {
    let mut net = Network::new();
    net.add(Linear::new(2, 3)).unwrap();
    net.add(Spreader::new(3, 2)).unwrap();
    net.add(Linear::new(3, 1)).unwrap();
    let w = counting(net.weight_count());
    let err = net.increase_width(1, &w, 0, 2, &mut StdRng::seed_from_u64(0)).unwrap_err();
    assert!(matches!(err, NetError::Unsupported { .. }));
    assert_eq!(net.layer(0).unwrap().outputs(), 3);
    assert_eq!(net.weight_count(), w.len());
}

#[test]
fn test_regularize_square_antisymmetrizes() {
    let mut net = Network::new();
    net.add(Linear::new(2, 2)).unwrap();
    net.add(Activation::tanh(2)).unwrap();
    let mut w = vec![0.5, -0.5, 1.0, 2.0, 4.0, 3.0];
    let lambda = 0.1;
    net.regularize_square(lambda, &mut w).unwrap();

    assert_eq!(&w[..2], &[0.5, -0.5]);
    assert_eq!((w[2], w[5]), (1.0, 3.0));
    // mirrored pairs move toward opposite signs
    assert!((w[3] - 1.4).abs() < 1e-12);
    assert!((w[4] - 3.4).abs() < 1e-12);
    assert!((w[3] + w[4] - (1.0 - 2.0 * lambda) * 6.0).abs() < 1e-12);
    assert!(matches!(net.regularize_square(lambda, &mut w[..4]), Err(NetError::ShapeMismatch { .. })));
}
