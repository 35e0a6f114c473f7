use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use memoir_contracts::decade::classify_decade;
use memoir_contracts::prompt::build_instruction;
use memoir_engine::{
    AudioUpload, EngineConfig, FailureClass, Gallery, MemoryImage, MemoryPipeline, PipelineError,
};
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "memoir-rs", version, about = "Turn a spoken memory into a period photograph")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Remember(RememberArgs),
    Imagine(ImagineArgs),
    Classify(ClassifyArgs),
    Gallery(GalleryArgs),
}

#[derive(Debug, Parser)]
struct RememberArgs {
    #[arg(long)]
    audio: PathBuf,
    #[arg(long)]
    gallery: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ImagineArgs {
    #[arg(long)]
    transcript: String,
    #[arg(long)]
    gallery: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ClassifyArgs {
    #[arg(long)]
    text: String,
}

#[derive(Debug, Parser)]
struct GalleryArgs {
    #[arg(long)]
    dir: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("memoir-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    match cli.command {
        Command::Remember(args) => {
            let audio = AudioUpload::from_path(&args.audio)?;
            let pipeline = build_pipeline(config, args.gallery, args.events)?;
            report(pipeline.remember(&audio))
        }
        Command::Imagine(args) => {
            let pipeline = build_pipeline(config, args.gallery, args.events)?;
            report(pipeline.imagine(&args.transcript))
        }
        Command::Classify(args) => run_classify(&args.text),
        Command::Gallery(args) => {
            let gallery = Gallery::new(args.dir.unwrap_or(config.gallery_dir));
            match gallery.list() {
                Ok(files) => {
                    print_json(&json!(files))?;
                    Ok(0)
                }
                Err(err) => Ok(fail(&err)),
            }
        }
    }
}

fn build_pipeline(
    mut config: EngineConfig,
    gallery: Option<PathBuf>,
    events: Option<PathBuf>,
) -> Result<MemoryPipeline> {
    if let Some(dir) = gallery {
        config.gallery_dir = dir;
    }
    let pipeline = MemoryPipeline::from_config(config).context("failed to set up pipeline")?;
    Ok(pipeline.with_event_log(events))
}

fn run_classify(text: &str) -> Result<i32> {
    match classify_decade(text) {
        Ok(decade) => {
            print_json(&json!({
                "decade": decade,
                "label": decade.label(),
                "instruction": build_instruction(text, decade),
            }))?;
            Ok(0)
        }
        Err(err) => Ok(fail(&PipelineError::from(err))),
    }
}

fn report(result: Result<MemoryImage, PipelineError>) -> Result<i32> {
    match result {
        Ok(image) => {
            print_json(&serde_json::to_value(&image)?)?;
            Ok(0)
        }
        Err(err) => Ok(fail(&err)),
    }
}

fn fail(err: &PipelineError) -> i32 {
    eprintln!("memoir-rs error: {}", err.user_message());
    exit_code(err.failure_class())
}

fn exit_code(class: FailureClass) -> i32 {
    match class {
        FailureClass::BadInput => 2,
        FailureClass::UpstreamUnavailable => 3,
        FailureClass::Internal => 1,
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_failure_class() {
        assert_eq!(exit_code(FailureClass::BadInput), 2);
        assert_eq!(exit_code(FailureClass::UpstreamUnavailable), 3);
        assert_eq!(exit_code(FailureClass::Internal), 1);
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["memoir-rs", "imagine", "--transcript", "the seventies"]);
        assert!(matches!(
            cli.map(|cli| cli.command),
            Ok(Command::Imagine(ImagineArgs { ref transcript, .. })) if transcript == "the seventies"
        ));
        assert!(Cli::try_parse_from(["memoir-rs", "remember"]).is_err());
    }

    #[test]
    fn classify_rejects_text_without_a_decade() -> anyhow::Result<()> {
        assert_eq!(run_classify("nothing datable here")?, 2);
        assert_eq!(run_classify("Photo from 1985")?, 0);
        Ok(())
    }
}
