//! Signature inspection tool: what each engine actually stores for a file

use asse::{extract_file, Config, Engine, EngineRegistry, MfccExtractor};
use std::env;
use std::path::Path;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: signature_detail <file> [engine]");
        std::process::exit(1);
    }

    let config = Config::default();
    let registry = match EngineRegistry::with_defaults(&config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to set up engines: {}", e);
            std::process::exit(1);
        }
    };

    let path = Path::new(&args[1]);
    let extractor = MfccExtractor::new(config.features.clone());
    let (features, rate) = match extract_file(path, &extractor, config.features.max_seconds) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to extract features: {}", e);
            std::process::exit(1);
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("FILE: {}", path.display());
    println!("{}", "=".repeat(60));
    println!("Sample rate: {} Hz", rate);
    println!("Frames:      {} x {} coefficients", features.rows(), features.cols());

    println!("\nCoefficient means:");
    for (i, m) in features.column_means().iter().enumerate() {
        println!("  c{:<3} {:>10.4}", i, m);
    }

    let engines: Vec<_> = match args.get(2) {
        Some(id) => match registry.get(id) {
            Ok(e) => vec![e],
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => registry.engines().cloned().collect(),
    };

    for engine in &engines {
        describe(engine.as_ref(), &features, rate);
    }
}

fn describe(engine: &dyn Engine, features: &asse::FeatureMatrix, rate: u32) {
    println!("\n--- {} ---", engine.identifier());
    let signature = match engine.extract_signature(features, rate) {
        Ok(s) => s,
        Err(e) => {
            println!("  error: {}", e);
            return;
        }
    };

    for name in signature.field_names() {
        if let Ok(array) = signature.get(name) {
            println!("  {:<32} shape {:?}", name, array.shape);
        }
    }
    let bundle_len = signature.to_bundle().map(|b| b.len()).unwrap_or(0);
    println!("  bundle: {} bytes", bundle_len);

    match engine.measure_similarity(&signature, &signature) {
        Ok(score) => println!("  self-similarity: {:?}", score),
        Err(e) => println!("  self-similarity error: {}", e),
    }
}
