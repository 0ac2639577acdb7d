//! Persisted model schema.
//!
//! A model document has three parts: global `config`, one `layers_head`
//! entry per layer (kind + scalar hyperparameters) and one `layers_data`
//! entry per layer (learned tensors, as Matrix text). Heads and data are
//! paired by position, never by id.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::{Conv, Dense, Dropout, Layer, Pool, Reshape};
use crate::math::matrix::Matrix;
use crate::network::network::Network;
use crate::network::shape::Shape;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub config: ModelConfig,
    pub layers_head: Vec<LayerHead>,
    pub layers_data: Vec<LayerData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub learning_rate: f64,
    pub layer_count: usize,
    pub train_correctness: f64,
    #[serde(default)]
    pub test_correctness: Option<f64>,
    pub input_shape: Shape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerHead {
    FullyConnected {
        input_size: usize,
        size: usize,
        activation: ActivationFunction,
    },
    Convolution {
        input_shape: Shape,
        depth: usize,
        kernel_size: usize,
        stride: usize,
        activation: ActivationFunction,
    },
    Pooling {
        input_shape: Shape,
        size: usize,
        stride: usize,
    },
    Dropout {
        input_shape: Shape,
        rate: f64,
    },
    Reshape {
        input_shape: Shape,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerData {
    FullyConnected { weights: Matrix, biases: Matrix },
    Convolution { kernels: Vec<Vec<Matrix>>, biases: Matrix },
    Pooling,
    Dropout,
    Reshape,
}

impl Layer {
    pub fn head(&self) -> LayerHead {
        match self {
            Layer::FullyConnected(l) => LayerHead::FullyConnected {
                input_size: l.input_size(),
                size: l.size(),
                activation: l.activation(),
            },
            Layer::Convolution(l) => LayerHead::Convolution {
                input_shape: l.input_shape(),
                depth: l.depth(),
                kernel_size: l.kernel_size(),
                stride: l.stride(),
                activation: l.activation(),
            },
            Layer::Pooling(l) => LayerHead::Pooling {
                input_shape: l.input_shape(),
                size: l.size(),
                stride: l.stride(),
            },
            Layer::Dropout(l) => LayerHead::Dropout {
                input_shape: l.shape(),
                rate: l.rate(),
            },
            Layer::Reshape(l) => LayerHead::Reshape {
                input_shape: l.input_shape(),
            },
        }
    }

    pub fn data(&self) -> LayerData {
        match self {
            Layer::FullyConnected(l) => LayerData::FullyConnected {
                weights: l.weights().clone(),
                biases: l.biases().clone(),
            },
            Layer::Convolution(l) => LayerData::Convolution {
                kernels: l.kernels().to_vec(),
                biases: l.biases().clone(),
            },
            Layer::Pooling(_) => LayerData::Pooling,
            Layer::Dropout(_) => LayerData::Dropout,
            Layer::Reshape(_) => LayerData::Reshape,
        }
    }

    /// Rebuilds a layer from a head/data pair without touching the random
    /// source except for a fresh dropout mask.
    pub fn from_parts(head: &LayerHead, data: &LayerData, rng: &mut StdRng) -> Result<Layer> {
        match (head, data) {
            (
                LayerHead::FullyConnected {
                    input_size,
                    size,
                    activation,
                },
                LayerData::FullyConnected { weights, biases },
            ) => {
                if weights.shape() != (*size, *input_size) {
                    return Err(Error::parse(format!(
                        "fully-connected weights are {}x{}, head says {}x{}",
                        weights.rows(),
                        weights.cols(),
                        size,
                        input_size
                    )));
                }
                Ok(Layer::FullyConnected(Dense::from_parts(
                    weights.clone(),
                    biases.clone(),
                    *activation,
                )?))
            }
            (
                LayerHead::Convolution {
                    input_shape,
                    depth,
                    kernel_size,
                    stride,
                    activation,
                },
                LayerData::Convolution { kernels, biases },
            ) => {
                if *stride != 1 {
                    return Err(Error::architecture(format!("unsupported convolution stride {}", stride)));
                }
                let conv = Conv::from_parts(*input_shape, kernels.clone(), biases.clone(), *activation)?;
                if conv.depth() != *depth || conv.kernel_size() != *kernel_size {
                    return Err(Error::parse("convolution kernels disagree with their head"));
                }
                Ok(Layer::Convolution(conv))
            }
            (
                LayerHead::Pooling {
                    input_shape,
                    size,
                    stride,
                },
                LayerData::Pooling,
            ) => Ok(Layer::Pooling(Pool::new(*input_shape, *size, *stride)?)),
            (LayerHead::Dropout { input_shape, rate }, LayerData::Dropout) => {
                Ok(Layer::Dropout(Dropout::new(*input_shape, *rate, rng)?))
            }
            (LayerHead::Reshape { input_shape }, LayerData::Reshape) => Ok(Layer::Reshape(Reshape::new(*input_shape))),
            _ => Err(Error::parse("layer head and data kinds differ")),
        }
    }
}

impl Network {
    pub fn to_document(&self) -> ModelDocument {
        ModelDocument {
            config: ModelConfig {
                learning_rate: self.learning_rate,
                layer_count: self.layers().len(),
                train_correctness: self.train_correctness,
                test_correctness: self.test_correctness,
                input_shape: self.input_shape(),
            },
            layers_head: self.layers().iter().map(Layer::head).collect(),
            layers_data: self.layers().iter().map(Layer::data).collect(),
        }
    }

    pub fn from_document(doc: &ModelDocument) -> Result<Network> {
        Network::from_document_with_rng(doc, StdRng::from_entropy())
    }

    /// Rebuilds a network from `doc`; any inconsistency fails the whole load.
    pub fn from_document_with_rng(doc: &ModelDocument, mut rng: StdRng) -> Result<Network> {
        let count = doc.config.layer_count;
        if doc.layers_head.len() != count || doc.layers_data.len() != count {
            return Err(Error::parse(format!(
                "config declares {} layers, found {} heads and {} data entries",
                count,
                doc.layers_head.len(),
                doc.layers_data.len()
            )));
        }
        let layers = doc
            .layers_head
            .iter()
            .zip(doc.layers_data.iter())
            .enumerate()
            .map(|(i, (head, data))| {
                Layer::from_parts(head, data, &mut rng).map_err(|e| Error::parse(format!("layer {}: {}", i, e)))
            })
            .collect::<Result<Vec<Layer>>>()?;

        let mut network = Network::from_layers(doc.config.input_shape, layers, rng)?;
        network.learning_rate = doc.config.learning_rate;
        network.train_correctness = doc.config.train_correctness;
        network.test_correctness = doc.config.test_correctness;
        Ok(network)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn from_json_str(json: &str) -> Result<Network> {
        let doc: ModelDocument = serde_json::from_str(json)?;
        Network::from_document(&doc)
    }

    /// Serializes the full model state to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.to_document())?;
        Ok(())
    }

    /// Loads a network previously written by `save_json`.
    pub fn load_json(path: &str) -> Result<Network> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let doc: ModelDocument = serde_json::from_reader(reader)?;
        Network::from_document(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerTemplate;

    fn cnn() -> Network {
        Network::with_rng(
            Shape::new(1, 6, 6),
            &[
                LayerTemplate::conv(2, 3, ActivationFunction::ReLU),
                LayerTemplate::pool(2, 2),
                LayerTemplate::dropout(0.2),
                LayerTemplate::dense(3, ActivationFunction::Softmax),
            ],
            StdRng::seed_from_u64(8),
        )
        .unwrap()
    }

    #[test]
    fn document_pairs_heads_and_data() {
        let doc = cnn().to_document();
        assert_eq!(doc.config.layer_count, 5);
        assert_eq!(doc.layers_head.len(), doc.layers_data.len());
        assert!(matches!(doc.layers_head[3], LayerHead::Reshape { .. }));
        assert!(matches!(doc.layers_data[0], LayerData::Convolution { .. }));
    }

    #[test]
    fn json_round_trip_preserves_parameters() {
        let net = cnn();
        let json = net.to_json_string().unwrap();
        assert!(json.contains("\"layers_head\""));
        assert!(json.contains("\"input_shape\": \"1 6 6\""));
        let back = Network::from_json_str(&json).unwrap();
        assert_eq!(back.to_document().layers_data, net.to_document().layers_data);
    }

    #[test]
    fn swapped_entries_fail_to_load() {
        let mut doc = cnn().to_document();
        doc.layers_data.swap(0, 1);
        assert!(Network::from_document(&doc).is_err());
    }

    fn mlp_document() -> ModelDocument {
        Network::with_rng(
            Shape::vector(4),
            &[
                LayerTemplate::dense(4, ActivationFunction::ReLU),
                LayerTemplate::dropout(0.2),
                LayerTemplate::dense(2, ActivationFunction::Softmax),
            ],
            StdRng::seed_from_u64(3),
        )
        .unwrap()
        .to_document()
    }

    // Every inserted layer maps a 4-vector onto a 4-vector, so only the
    // ordering rules can reject the document.
    fn with_inserted(mut doc: ModelDocument, inserts: &[(usize, &Layer)]) -> ModelDocument {
        for &(at, layer) in inserts {
            doc.layers_head.insert(at, layer.head());
            doc.layers_data.insert(at, layer.data());
            doc.config.layer_count += 1;
        }
        doc
    }

    #[test]
    fn misordered_layers_fail_to_load() {
        let mut rng = StdRng::seed_from_u64(0);
        let dropout = Layer::Dropout(Dropout::new(Shape::vector(4), 0.2, &mut rng).unwrap());
        let pool = Layer::Pooling(Pool::new(Shape::vector(4), 1, 1).unwrap());
        let reshape = Layer::Reshape(Reshape::new(Shape::vector(4)));

        let control = with_inserted(mlp_document(), &[(0, &reshape)]);
        assert!(Network::from_document(&control).is_ok());

        let tampered = [
            with_inserted(mlp_document(), &[(0, &dropout)]),
            with_inserted(mlp_document(), &[(1, &pool)]),
            with_inserted(mlp_document(), &[(0, &reshape), (0, &reshape)]),
            with_inserted(mlp_document(), &[(0, &dropout), (0, &reshape)]),
            with_inserted(mlp_document(), &[(1, &reshape)]),
        ];
        for doc in &tampered {
            assert!(
                matches!(Network::from_document(doc), Err(Error::InvalidArchitecture(_))),
                "loaded {:?}",
                doc.layers_head
            );
        }
    }

    #[test]
    fn count_mismatch_fails_to_load() {
        let mut doc = cnn().to_document();
        doc.config.layer_count = 4;
        assert!(matches!(Network::from_document(&doc), Err(Error::Parse(_))));
    }

    #[test]
    fn missing_field_fails_to_parse() {
        let json = cnn().to_json_string().unwrap().replace("\"train_correctness\"", "\"renamed\"");
        assert!(Network::from_json_str(&json).is_err());
    }
}
