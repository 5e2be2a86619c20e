//! Persisted block descriptions and the factory that turns them back into
//! blocks.

use serde::{Deserialize, Serialize};

use super::{
    Activation, Block, BlockKind, CatIn, Conv, Elbow, Hinge, HypercubeEdges, LeakyTanh, Linear, Lstm,
    MaxPooling2D, Repeater, RunningNormalizer, ScalarProduct, ScalarSum, SoftExp, SoftMax, Spectral,
    Spreader, Switch, TemperedLinear,
};
use crate::backprop::ActivationFn;
use crate::error::{NetError, NetResult};

/// Variant tag plus per-variant hyperparameters. Sizes live in [`PlacedBlock`].
///
/// The serialized `type` tag of every variant equals [`BlockKind::tag`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockSpec {
    Linear,
    TemperedLinear {
        deviation_cap: f64,
        forget_rate: f64,
        #[serde(default)]
        moment1: Vec<f64>,
        #[serde(default)]
        moment2: Vec<f64>,
    },
    Activation {
        function: ActivationFn,
    },
    SoftMax,
    Spectral {
        start: f64,
        scale: f64,
        shift: f64,
    },
    Repeater,
    Spreader {
        spread: usize,
    },
    ScalarSum,
    ScalarProduct,
    Switch,
    Hinge,
    Elbow,
    LeakyTanh,
    SoftExp {
        beta: f64,
    },
    RunningNormalizer {
        batch_size: f64,
    },
    Conv {
        input_shape: Vec<usize>,
        filter_shape: Vec<usize>,
        output_shape: Vec<usize>,
    },
    #[serde(rename = "max_pooling_2d")]
    MaxPooling2D {
        width: usize,
        height: usize,
        channels: usize,
    },
    HypercubeEdges,
    CatIn {
        value_count: usize,
    },
    Lstm,
}

impl BlockSpec {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Linear => BlockKind::Linear,
            Self::TemperedLinear { .. } => BlockKind::TemperedLinear,
            Self::Activation { .. } => BlockKind::Activation,
            Self::SoftMax => BlockKind::SoftMax,
            Self::Spectral { .. } => BlockKind::Spectral,
            Self::Repeater => BlockKind::Repeater,
            Self::Spreader { .. } => BlockKind::Spreader,
            Self::ScalarSum => BlockKind::ScalarSum,
            Self::ScalarProduct => BlockKind::ScalarProduct,
            Self::Switch => BlockKind::Switch,
            Self::Hinge => BlockKind::Hinge,
            Self::Elbow => BlockKind::Elbow,
            Self::LeakyTanh => BlockKind::LeakyTanh,
            Self::SoftExp { .. } => BlockKind::SoftExp,
            Self::RunningNormalizer { .. } => BlockKind::RunningNormalizer,
            Self::Conv { .. } => BlockKind::Conv,
            Self::MaxPooling2D { .. } => BlockKind::MaxPooling2D,
            Self::HypercubeEdges => BlockKind::HypercubeEdges,
            Self::CatIn { .. } => BlockKind::CatIn,
            Self::Lstm => BlockKind::Lstm,
        }
    }

    /// Constructs the block this description names.
    ///
    /// Elementwise and pairwise blocks take their width from `outputs`; the
    /// caller is expected to confirm the built block's arity afterwards.
    pub fn build(&self, inputs: usize, outputs: usize) -> NetResult<Box<dyn Block>> {
        let block: Box<dyn Block> = match self.clone() {
            Self::Linear => Box::new(Linear::new(inputs, outputs)),
            Self::TemperedLinear {
                deviation_cap,
                forget_rate,
                moment1,
                moment2,
            } => {
                if moment1.is_empty() && moment2.is_empty() {
                    Box::new(TemperedLinear::new(inputs, outputs, deviation_cap, forget_rate))
                } else {
                    Box::new(TemperedLinear::with_moments(
                        inputs,
                        outputs,
                        deviation_cap,
                        forget_rate,
                        moment1,
                        moment2,
                    )?)
                }
            }
            Self::Activation { function } => Box::new(Activation::new(function, outputs)),
            Self::SoftMax => Box::new(SoftMax::new(outputs)),
            Self::Spectral { start, scale, shift } => Box::new(Spectral::from_schedule(outputs, start, scale, shift)),
            Self::Repeater => Box::new(Repeater::new(inputs, outputs)),
            Self::Spreader { spread } => Box::new(Spreader::new(outputs, spread)),
            Self::ScalarSum => Box::new(ScalarSum::new(outputs)),
            Self::ScalarProduct => Box::new(ScalarProduct::new(outputs)),
            Self::Switch => Box::new(Switch::new(outputs)),
            Self::Hinge => Box::new(Hinge::new(outputs)),
            Self::Elbow => Box::new(Elbow::new(outputs)),
            Self::LeakyTanh => Box::new(LeakyTanh::new(outputs)),
            Self::SoftExp { beta } => Box::new(SoftExp::new(outputs, beta)),
            Self::RunningNormalizer { batch_size } => Box::new(RunningNormalizer::new(outputs, batch_size)),
            Self::Conv {
                input_shape,
                filter_shape,
                output_shape,
            } => Box::new(Conv::new(input_shape, filter_shape, output_shape)?),
            Self::MaxPooling2D { width, height, channels } => Box::new(MaxPooling2D::new(width, height, channels)?),
            Self::HypercubeEdges => Box::new(HypercubeEdges::new(inputs, outputs)),
            Self::CatIn { value_count } => Box::new(CatIn::new(value_count, outputs)),
            Self::Lstm => Box::new(Lstm::new(inputs, outputs)),
        };
        Ok(block)
    }
}

/// One block of a persisted layer: where it reads, how wide it is, what it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedBlock {
    /// Start of the block's window into the layer input.
    pub inpos: usize,
    #[serde(rename = "in")]
    pub inputs: usize,
    #[serde(rename = "out")]
    pub outputs: usize,
    #[serde(flatten)]
    pub spec: BlockSpec,
}

impl PlacedBlock {
    pub fn describe(block: &dyn Block, inpos: usize) -> Self {
        Self {
            inpos,
            inputs: block.inputs(),
            outputs: block.outputs(),
            spec: block.to_spec(),
        }
    }

    /// Builds the block and checks that it has the declared arity.
    pub fn build(&self) -> NetResult<Box<dyn Block>> {
        let block = self.spec.build(self.inputs, self.outputs)?;
        NetError::check_len("persisted block inputs", self.inputs, block.inputs())?;
        NetError::check_len("persisted block outputs", self.outputs, block.outputs())?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_of_each() -> Vec<BlockSpec> {
        vec![
            BlockSpec::Linear,
            BlockSpec::TemperedLinear {
                deviation_cap: 3.0,
                forget_rate: 0.01,
                moment1: vec![],
                moment2: vec![],
            },
            BlockSpec::Activation {
                function: ActivationFn::Tanh,
            },
            BlockSpec::SoftMax,
            BlockSpec::Spectral {
                start: 0.1,
                scale: 2.0,
                shift: 0.0,
            },
            BlockSpec::Repeater,
            BlockSpec::Spreader { spread: 2 },
            BlockSpec::ScalarSum,
            BlockSpec::ScalarProduct,
            BlockSpec::Switch,
            BlockSpec::Hinge,
            BlockSpec::Elbow,
            BlockSpec::LeakyTanh,
            BlockSpec::SoftExp { beta: 0.5 },
            BlockSpec::RunningNormalizer { batch_size: 16.0 },
            BlockSpec::Conv {
                input_shape: vec![4],
                filter_shape: vec![3],
                output_shape: vec![4],
            },
            BlockSpec::MaxPooling2D {
                width: 2,
                height: 2,
                channels: 1,
            },
            BlockSpec::HypercubeEdges,
            BlockSpec::CatIn { value_count: 5 },
            BlockSpec::Lstm,
        ]
    }

    #[test]
    fn test_serialized_tags_match_registry() {
        let specs = one_of_each();
        assert_eq!(specs.len(), BlockKind::ALL.len());
        for spec in specs {
            let value = serde_json::to_value(&spec).unwrap();
            assert_eq!(value["type"], spec.kind().tag());
            assert_eq!(serde_json::from_value::<BlockSpec>(value).unwrap(), spec);
        }
    }

    #[test]
    fn test_placed_block_checks_arity() {
        let json = r#"{"type":"scalar_sum","inpos":0,"in":6,"out":3}"#;
        let placed: PlacedBlock = serde_json::from_str(json).unwrap();
        assert_eq!(placed.build().unwrap().inputs(), 6);

        let wrong = PlacedBlock { inputs: 5, ..placed };
        assert!(matches!(wrong.build(), Err(NetError::ShapeMismatch { .. })));
    }
}
