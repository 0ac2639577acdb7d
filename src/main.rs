use convnet::train::{LoggingConfig, PatienceConfig};
use convnet::{ActivationFunction, LayerTemplate, Network, NetworkSpec, Sample, Shape, Trainer, TrainerConfig};

// Demo: separates all-zero inputs from all-one inputs with a small MLP.
//   cargo run -- [model.json]
fn main() -> convnet::Result<()> {
    let save_path = std::env::args().nth(1);

    let mut spec = NetworkSpec::new(
        Shape::vector(4),
        vec![
            LayerTemplate::dense(4, ActivationFunction::ReLU),
            LayerTemplate::dense(2, ActivationFunction::Softmax),
        ],
    );
    spec.seed = Some(7);
    let network = Network::from_spec(&spec)?;
    println!("Network: {} layers, {} parameters", network.layers().len(), network.parameter_count());

    let mut train_set = Vec::new();
    for _ in 0..50 {
        train_set.push(Sample::from_vector(vec![0.0; 4], 0, 2)?);
        train_set.push(Sample::from_vector(vec![1.0; 4], 1, 2)?);
    }
    let test_set = vec![
        Sample::from_vector(vec![0.0; 4], 0, 2)?,
        Sample::from_vector(vec![1.0; 4], 1, 2)?,
    ];

    let mut config = TrainerConfig::new(0.1, 0.001, 20, 10);
    config.patience = Some(PatienceConfig {
        initial_ignore: 50.0,
        patience: 0.3,
    });
    config.logging = Some(LoggingConfig {
        log_sample_count: 20,
        record_samples: false,
    });
    config.verbose = true;
    config.seed = Some(7);

    let mut trainer = Trainer::new(network, train_set, config)?.with_test_set(test_set.clone())?;
    let state = trainer.train()?;
    println!("Trainer state: {:?}", state);

    let network = trainer.network();
    for sample in &test_set {
        let p = network.predict(&sample.inputs)?;
        println!("Input: {} -> class {} ({:.4})", sample.inputs[0].transpose(), p.argmax()?, p.max());
    }
    if let Some(test) = network.test_correctness {
        println!("Test correctness: {:.2}%", test * 100.0);
    }

    if let Some(path) = save_path {
        network.save_json(&path)?;
        println!("Model saved to {}", path);
    }
    Ok(())
}
