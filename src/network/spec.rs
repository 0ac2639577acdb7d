use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::layers::template::LayerTemplate;
use crate::network::network::{validate_templates, DEFAULT_LEARNING_RATE};
use crate::network::shape::Shape;

/// A fully serializable description of a network architecture.
///
/// `NetworkSpec` can be saved to / loaded from JSON independently of any
/// trained weights, so architectures can be stored before training starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Shape of one input sample, e.g. `"1 28 28"`.
    pub input_shape: Shape,
    /// Ordered list of layer templates (input → output). Reshape layers are
    /// added automatically.
    pub layers: Vec<LayerTemplate>,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Seed for weight init, dropout masks and shuffling. Entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_learning_rate() -> f64 {
    DEFAULT_LEARNING_RATE
}

impl NetworkSpec {
    pub fn new(input_shape: Shape, layers: Vec<LayerTemplate>) -> NetworkSpec {
        NetworkSpec {
            input_shape,
            layers,
            learning_rate: DEFAULT_LEARNING_RATE,
            seed: None,
        }
    }

    /// Checks layer ordering and that every layer fits the shape it is fed,
    /// without allocating weights. Returns the network's output shape.
    pub fn validate(&self) -> Result<Shape> {
        validate_templates(&self.layers)?;
        self.layers
            .iter()
            .try_fold(self.input_shape, |shape, template| template.output_shape(shape))
    }

    /// Serializes the network description to a pretty-printed JSON file.
    pub fn save_json(&self, path: &str) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a `NetworkSpec` from a JSON file.
    pub fn load_json(path: &str) -> Result<NetworkSpec> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
