use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::{Conv, Dense, Dropout, Gradients, Layer, LayerOutput, LayerTemplate, Pool, Reshape};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::matrix::Matrix;
use crate::network::sample::Sample;
use crate::network::shape::Shape;
use crate::network::spec::NetworkSpec;
use crate::optim::sgd::Sgd;

/// A linear stack of layers ending in a Softmax classifier.
#[derive(Debug, Clone)]
pub struct Network {
    layers: Vec<Layer>,
    input_shape: Shape,
    /// Current learning rate; the trainer adjusts it between batches.
    pub learning_rate: f64,
    /// Correctness measured on the training set at the last epoch end.
    pub train_correctness: f64,
    pub test_correctness: Option<f64>,
    sgd: Sgd,
    rng: StdRng,
}

/// Activated and auxiliary outputs of every layer for one sample.
pub type ForwardTrace = Vec<LayerOutput>;

pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

impl Network {
    /// Builds a network from templates, seeding weights from entropy.
    pub fn new(input_shape: Shape, templates: &[LayerTemplate]) -> Result<Network> {
        Network::with_rng(input_shape, templates, StdRng::from_entropy())
    }

    /// Builds a network from templates with an explicit random source, so a
    /// given seed always produces the same weights, masks and shuffles.
    pub fn with_rng(input_shape: Shape, templates: &[LayerTemplate], mut rng: StdRng) -> Result<Network> {
        validate_templates(templates)?;

        let mut layers = Vec::with_capacity(templates.len() + 1);
        let mut shape = input_shape;
        let mut flattened = false;

        for template in templates {
            if template.is_fully_connected() && !flattened {
                if !shape.is_vector() {
                    let reshape = Reshape::new(shape);
                    shape = reshape.output_shape();
                    layers.push(Layer::Reshape(reshape));
                }
                flattened = true;
            }

            let layer = match *template {
                LayerTemplate::FullyConnected { size, activation } => {
                    Layer::FullyConnected(Dense::new(shape.rows, size, activation, &mut rng)?)
                }
                LayerTemplate::Convolution {
                    depth,
                    kernel_size,
                    stride,
                    activation,
                } => Layer::Convolution(Conv::new(shape, depth, kernel_size, stride, activation, &mut rng)?),
                LayerTemplate::Pooling { size, stride } => Layer::Pooling(Pool::new(shape, size, stride)?),
                LayerTemplate::Dropout { rate } => Layer::Dropout(Dropout::new(shape, rate, &mut rng)?),
            };
            shape = layer.output_shape();
            layers.push(layer);
        }

        Ok(Network {
            layers,
            input_shape,
            learning_rate: DEFAULT_LEARNING_RATE,
            train_correctness: 0.0,
            test_correctness: None,
            sgd: Sgd::default(),
            rng,
        })
    }

    pub fn from_spec(spec: &NetworkSpec) -> Result<Network> {
        spec.validate()?;
        let rng = match spec.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut network = Network::with_rng(spec.input_shape, &spec.layers, rng)?;
        network.learning_rate = spec.learning_rate;
        Ok(network)
    }

    /// Reassembles a network from already-built layers (model loading).
    pub(crate) fn from_layers(input_shape: Shape, layers: Vec<Layer>, rng: StdRng) -> Result<Network> {
        check_layer_order(&layers)?;
        let mut shape = input_shape;
        for (i, layer) in layers.iter().enumerate() {
            if layer.input_shape() != shape {
                return Err(Error::architecture(format!(
                    "layer {} ({}) expects input {}, previous layer produces {}",
                    i,
                    layer.kind(),
                    layer.input_shape(),
                    shape
                )));
            }
            shape = layer.output_shape();
        }
        match layers.last() {
            Some(Layer::FullyConnected(d)) if d.activation() == ActivationFunction::Softmax => {}
            _ => return Err(Error::architecture("last layer must be fully-connected with softmax")),
        }
        Ok(Network {
            layers,
            input_shape,
            learning_rate: DEFAULT_LEARNING_RATE,
            train_correctness: 0.0,
            test_correctness: None,
            sgd: Sgd::default(),
            rng,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        self.layers.last().map(|l| l.output_shape()).unwrap_or(self.input_shape)
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Training-mode forward pass recording every layer's outputs.
    pub fn feedforward(&self, inputs: &[Matrix]) -> Result<ForwardTrace> {
        self.input_shape.check(inputs)?;
        let mut trace: ForwardTrace = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let input = trace.last().map(|o| o.activated.as_slice()).unwrap_or(inputs);
            let out = layer.forward(input)?;
            trace.push(out);
        }
        Ok(trace)
    }

    /// Runs the backward pass for one sample, adding parameter gradients to
    /// `grads` (one buffer per layer, from [`Network::new_gradients`]).
    pub fn backpropagate(
        &self,
        inputs: &[Matrix],
        trace: &ForwardTrace,
        expected: &Matrix,
        grads: &mut [Gradients],
    ) -> Result<()> {
        if trace.len() != self.layers.len() || grads.len() != self.layers.len() {
            return Err(Error::shape("trace and gradient buffers must cover every layer"));
        }
        let predicted = output_column(trace)?;
        let mut error = vec![CrossEntropyLoss::error(predicted, expected)?];

        for i in (0..self.layers.len()).rev() {
            let prev = if i == 0 { inputs } else { trace[i - 1].activated.as_slice() };
            error = self.layers[i].backward(&error, prev, &trace[i].auxiliary, self.learning_rate, &mut grads[i])?;
        }
        Ok(())
    }

    pub fn new_gradients(&self) -> Vec<Gradients> {
        self.layers.iter().map(|l| l.new_gradients()).collect()
    }

    /// Folds batch-summed gradients into every layer, then applies the
    /// averaged, clipped update layer by layer.
    pub fn apply_gradients(&mut self, grads: &[Gradients], batch_size: usize) -> Result<()> {
        for (layer, g) in self.layers.iter_mut().zip(grads.iter()) {
            layer.accumulate(g)?;
        }
        for layer in self.layers.iter_mut() {
            layer.update_weights_and_biases(batch_size, &self.sgd, &mut self.rng)?;
        }
        Ok(())
    }

    /// Inference: Dropout layers only scale. The final output must be a
    /// single column.
    pub fn predict(&self, inputs: &[Matrix]) -> Result<Matrix> {
        self.input_shape.check(inputs)?;
        let mut current = inputs.to_vec();
        for layer in &self.layers {
            current = layer.predict(&current)?;
        }
        match current.as_slice() {
            [out] if out.cols() == 1 => Ok(out.clone()),
            _ => Err(Error::shape("network output is not a single column")),
        }
    }

    /// Fraction of `samples` whose predicted class matches the target class.
    pub fn evaluate(&self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let correct = AtomicUsize::new(0);
        samples.par_iter().try_for_each(|s| -> Result<()> {
            if self.predict(&s.inputs)?.argmax()? == s.class()? {
                correct.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        })?;
        Ok(correct.load(Ordering::Relaxed) as f64 / samples.len() as f64)
    }

    /// Mean cross-entropy over `samples` in inference mode.
    pub fn loss(&self, samples: &[Sample]) -> Result<f64> {
        if samples.is_empty() {
            return Ok(0.0);
        }
        let total = samples
            .par_iter()
            .map(|s| {
                let p = CrossEntropyLoss::clamp(&self.predict(&s.inputs)?);
                CrossEntropyLoss::loss(&p, &s.target)
            })
            .try_reduce(|| 0.0, |a, b| Ok(a + b))?;
        Ok(total / samples.len() as f64)
    }

    /// Per-class `(correct, total)` counts, indexed by class.
    pub fn class_correctness(&self, samples: &[Sample]) -> Result<Vec<ClassCorrectness>> {
        let classes = self.output_shape().rows;
        let counts = samples
            .par_iter()
            .map(|s| -> Result<(usize, bool)> {
                let class = s.class()?;
                Ok((class, self.predict(&s.inputs)?.argmax()? == class))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut table: Vec<ClassCorrectness> = (0..classes)
            .map(|class| ClassCorrectness {
                class,
                correct: 0,
                total: 0,
            })
            .collect();
        for (class, hit) in counts {
            let entry = table
                .get_mut(class)
                .ok_or_else(|| Error::shape(format!("target class {} exceeds network output", class)))?;
            entry.total += 1;
            if hit {
                entry.correct += 1;
            }
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassCorrectness {
    pub class: usize,
    pub correct: usize,
    pub total: usize,
}

impl ClassCorrectness {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// The softmax column at the end of a forward trace.
pub(crate) fn output_column(trace: &ForwardTrace) -> Result<&Matrix> {
    match trace.last().map(|o| o.activated.as_slice()) {
        Some([out]) if out.cols() == 1 => Ok(out),
        _ => Err(Error::shape("network output is not a single column")),
    }
}

/// Structural rules every template list must satisfy before any layer is
/// built.
pub fn validate_templates(templates: &[LayerTemplate]) -> Result<()> {
    let last = templates
        .last()
        .ok_or_else(|| Error::architecture("network needs at least one layer"))?;
    match last {
        LayerTemplate::FullyConnected {
            activation: ActivationFunction::Softmax,
            ..
        } => {}
        _ => return Err(Error::architecture("last layer must be fully-connected with softmax")),
    }
    if matches!(templates[0], LayerTemplate::Dropout { .. }) {
        return Err(Error::architecture("dropout cannot be the first layer"));
    }
    if let Some(first_fc) = templates.iter().position(|t| t.is_fully_connected()) {
        if let Some(bad) = templates[first_fc..].iter().position(|t| t.is_spatial()) {
            return Err(Error::architecture(format!(
                "layer {} is convolution/pooling after a fully-connected layer",
                first_fc + bad
            )));
        }
    }
    Ok(())
}

/// The ordering rules of [`validate_templates`], restated over built layers
/// plus the placement of the single Reshape.
fn check_layer_order(layers: &[Layer]) -> Result<()> {
    if matches!(layers.first(), Some(Layer::Dropout(_))) {
        return Err(Error::architecture("dropout cannot be the first layer"));
    }
    let mut seen_fc = false;
    let mut seen_reshape = false;
    for (i, layer) in layers.iter().enumerate() {
        match layer {
            Layer::FullyConnected(_) => seen_fc = true,
            Layer::Convolution(_) | Layer::Pooling(_) if seen_fc => {
                return Err(Error::architecture(format!(
                    "layer {} ({}) follows a fully-connected layer",
                    i,
                    layer.kind()
                )));
            }
            Layer::Reshape(_) => {
                if seen_reshape || seen_fc {
                    return Err(Error::architecture(format!("unexpected reshape at layer {}", i)));
                }
                if !matches!(layers.get(i + 1), Some(Layer::FullyConnected(_))) {
                    return Err(Error::architecture(format!(
                        "reshape at layer {} is not followed by a fully-connected layer",
                        i
                    )));
                }
                seen_reshape = true;
            }
            _ => {}
        }
    }
    Ok(())
}
