//! voxstudio CLI entry point.

use std::fs;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use voxstudio::backend::BackendSelector;
use voxstudio::cache::PromptCache;
use voxstudio::cli::{Args, Reference};
use voxstudio::engine::{GenerationRequest, SynthesisDispatcher, VoiceReference};
use voxstudio::progress::TaskRegistry;

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = args.settings();
    settings.validate().context("Invalid configuration")?;

    let cache = PromptCache::open(settings.cache_dir());
    let dispatcher = SynthesisDispatcher::new(
        BackendSelector::new(settings.clone()),
        cache,
        TaskRegistry::new(settings.task_retention),
        settings.max_text_len,
    );

    // Handle utility commands first
    if args.clear_cache || args.cache_stats || args.health {
        if args.clear_cache {
            let removed = dispatcher
                .cache()
                .clear()
                .context("Failed to clear voice prompt cache")?;
            println!("Removed {removed} cached voice prompts.");
        }
        if args.cache_stats {
            print_json(&dispatcher.cache().stats())?;
        }
        if args.health {
            let report = dispatcher.health().context("Backend unavailable")?;
            print_json(&report)?;
        }
        if args.generate.is_none() {
            return Ok(());
        }
    }

    if let Some(text) = &args.generate {
        return generate_speech(&dispatcher, &args, text);
    }

    eprintln!("No action specified. Use -r with -g to generate speech.");
    eprintln!("Run with --help for usage information.");
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_reference(args: &Args) -> Result<VoiceReference> {
    if args.references.is_empty() {
        bail!("At least one reference (-r \"file.wav;transcript\") is required");
    }

    let mut samples = Vec::with_capacity(args.references.len());
    let mut transcripts = Vec::with_capacity(args.references.len());
    for input in &args.references {
        let reference = Reference::parse(input)?;
        let bytes = fs::read(&reference.audio_path).with_context(|| {
            format!(
                "Failed to read reference audio: {}",
                reference.audio_path.display()
            )
        })?;
        samples.push(bytes);
        transcripts.push(reference.transcript);
    }

    Ok(VoiceReference::new(samples, transcripts.join(" ")))
}

fn generate_speech(dispatcher: &SynthesisDispatcher, args: &Args, text: &str) -> Result<()> {
    let reference = load_reference(args)?;

    let mut request = GenerationRequest::new(&args.profile, text)
        .with_language(&args.language)
        .with_variant(args.model_size);
    request.seed = args.seed;
    request.instructions = args.instruct.clone();

    println!("Generating speech...");
    println!("  Profile: {}", request.profile_id);
    println!("  Model: {}", request.model_variant);

    let task_id = dispatcher.register_generation(&request, &reference)?;
    let subscription = dispatcher.registry().subscribe(&task_id);
    let printer = thread::spawn(move || {
        for snapshot in subscription {
            println!("  [{:>3}%] {}", snapshot.progress, snapshot.stage);
        }
    });

    let result = dispatcher.generate(&task_id, &request, &reference);
    // The subscription ends with the task's terminal snapshot.
    if printer.join().is_err() {
        warn!(task_id = %task_id, "Progress printer thread panicked");
    }
    let outcome = result.context("Failed to synthesize speech")?;

    if let Some(fallback) = outcome.variant_fallback {
        println!(
            "  Note: model {} is not available on this machine, used {}",
            fallback.requested, fallback.used
        );
    }
    for warning in &outcome.warnings {
        eprintln!("  Warning: {warning}");
    }

    fs::write(&args.output, &outcome.audio)
        .with_context(|| format!("Failed to write audio to: {}", args.output.display()))?;

    println!("Audio saved to: {}", args.output.display());
    println!("  Size: {} bytes", outcome.audio.len());
    if let Some(duration) = outcome.duration_secs {
        println!("  Duration: {duration:.2}s");
    }
    println!(
        "  Voice prompt: {}",
        if outcome.cache_hit { "cached" } else { "computed" }
    );

    Ok(())
}
