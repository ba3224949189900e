use anyhow::Result;
use std::path::PathBuf;

use biocheck::faces::{default_models_dir, OnnxFaceEncoder};
use biocheck::{
    logging, Config, FaceMatcher, Modality, PalmMatcher, Verdict, VerificationSummary, VoiceMatcher,
};

/// Exit code when every checked modality passed
const EXIT_ACCEPTED: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_REJECTED: i32 = 2;

#[derive(Debug, PartialEq)]
enum Command {
    FetchModels,
    Face(PathBuf, PathBuf),
    /// Whole-image SSIM; the palm decision thresholds are calibrated on it
    Palm(PathBuf, PathBuf),
    PalmAdvanced(PathBuf, PathBuf),
    Voice(PathBuf, PathBuf),
    Summary {
        face: (PathBuf, PathBuf),
        palm: (PathBuf, PathBuf),
        voice: (PathBuf, PathBuf),
    },
}

struct CliArgs {
    config_path: Option<PathBuf>,
    json: bool,
    command: Command,
}

fn usage_error(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(EXIT_USAGE);
}

fn parse_command(name: &str, paths: &[PathBuf]) -> Result<Command, String> {
    let expected = match name {
        "fetch-models" => 0,
        "summary" => 6,
        "face" | "palm" | "palm-advanced" | "voice" => 2,
        other => return Err(format!("Unknown command: {}", other)),
    };
    if paths.len() != expected {
        return Err(format!("'{}' takes {} paths, got {}", name, expected, paths.len()));
    }
    let pair = |i: usize| (paths[i].clone(), paths[i + 1].clone());

    Ok(match name {
        "fetch-models" => Command::FetchModels,
        "face" => Command::Face(paths[0].clone(), paths[1].clone()),
        "palm" => Command::Palm(paths[0].clone(), paths[1].clone()),
        "palm-advanced" => Command::PalmAdvanced(paths[0].clone(), paths[1].clone()),
        "voice" => Command::Voice(paths[0].clone(), paths[1].clone()),
        _ => Command::Summary {
            face: pair(0),
            palm: pair(2),
            voice: pair(4),
        },
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut json = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("biocheck {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    usage_error("--config requires a path argument");
                }
            }
            "--json" => json = true,
            arg if arg.starts_with('-') => usage_error(&format!("Unknown argument: {}", arg)),
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let Some((name, paths)) = positional.split_first() else {
        usage_error("missing command");
    };
    let paths: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();

    let command = parse_command(name, &paths).unwrap_or_else(|e| usage_error(&e));

    CliArgs {
        config_path,
        json,
        command,
    }
}

fn print_help() {
    println!(
        r#"biocheck - face, palm and voice verification

USAGE:
    biocheck [OPTIONS] face <REFERENCE> <CANDIDATE>
    biocheck [OPTIONS] palm <IMAGE_A> <IMAGE_B>
    biocheck [OPTIONS] palm-advanced <IMAGE_A> <IMAGE_B>
    biocheck [OPTIONS] voice <REFERENCE_WAV> <NEW_WAV>
    biocheck [OPTIONS] summary <FACE_A> <FACE_B> <PALM_A> <PALM_B> <VOICE_A> <VOICE_B>
    biocheck [OPTIONS] fetch-models

COMMANDS:
    palm                Whole-image SSIM (the path the palm thresholds are tuned for)
    palm-advanced       Palm segmentation and keypoint matching
    fetch-models        Download the face models; comparisons never download

OPTIONS:
    --config, -c PATH   Path to config file
    --json              Print the verdicts as JSON
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    BIOCHECK_LOG        Log level (debug, info, warn, error)

EXIT STATUS:
    0 accepted, 2 rejected, 1 usage or configuration error

Config file location: $XDG_CONFIG_HOME/biocheck/config.toml"#
    );
}

fn print_verdict(verdict: &Verdict) {
    println!(
        "{}: {:.1}% ({})",
        verdict.modality,
        verdict.percent(),
        if verdict.accepted { "accepted" } else { "rejected" }
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    let _ = logging::init(None);

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let palms = PalmMatcher::new(config.palm.clone());
    let voices = VoiceMatcher::new(config.voice.clone());
    let decide = |modality, score| config.decision.decide(modality, score);

    let mut summary = VerificationSummary::default();
    match &args.command {
        Command::FetchModels => {
            let models_dir = config.face.models_dir.clone().unwrap_or_else(default_models_dir);
            OnnxFaceEncoder::new(models_dir.clone()).fetch_models()?;
            println!("models ready in {}", models_dir.display());
            return Ok(());
        }
        Command::Face(a, b) => {
            let score = FaceMatcher::onnx(config.face.clone()).compare(a, b);
            summary.record(decide(Modality::Face, score));
        }
        Command::Palm(a, b) => summary.record(decide(Modality::Palm, palms.compare_simple(a, b))),
        Command::PalmAdvanced(a, b) => summary.record(decide(Modality::Palm, palms.compare_advanced(a, b))),
        Command::Voice(a, b) => summary.record(decide(Modality::Voice, voices.verify(a, b))),
        Command::Summary { face, palm, voice } => {
            let face_score = FaceMatcher::onnx(config.face.clone()).compare(&face.0, &face.1);
            summary.record(decide(Modality::Face, face_score));
            summary.record(decide(Modality::Palm, palms.compare_simple(&palm.0, &palm.1)));
            summary.record(decide(Modality::Voice, voices.verify(&voice.0, &voice.1)));
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for verdict in summary.verdicts() {
            print_verdict(verdict);
        }
        if matches!(args.command, Command::Summary { .. }) {
            println!("overall: {}", if summary.accepted() { "accepted" } else { "rejected" });
        }
    }

    tracing::info!(accepted = summary.accepted(), "Verification finished");
    std::process::exit(if summary.accepted() { EXIT_ACCEPTED } else { EXIT_REJECTED });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_palm_uses_ssim_path() {
        let cmd = parse_command("palm", &paths(&["a.png", "b.png"])).unwrap();
        assert_eq!(cmd, Command::Palm(PathBuf::from("a.png"), PathBuf::from("b.png")));

        let cmd = parse_command("palm-advanced", &paths(&["a.png", "b.png"])).unwrap();
        assert!(matches!(cmd, Command::PalmAdvanced(..)));
    }

    #[test]
    fn test_summary_takes_six_paths() {
        let cmd = parse_command("summary", &paths(&["f1", "f2", "p1", "p2", "v1", "v2"])).unwrap();
        match cmd {
            Command::Summary { face, palm, voice } => {
                assert_eq!(face.0, PathBuf::from("f1"));
                assert_eq!(palm.1, PathBuf::from("p2"));
                assert_eq!(voice.0, PathBuf::from("v1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(parse_command("summary", &paths(&["f1", "f2"])).is_err());
    }

    #[test]
    fn test_fetch_models_takes_no_paths() {
        assert_eq!(parse_command("fetch-models", &[]).unwrap(), Command::FetchModels);
        assert!(parse_command("fetch-models", &paths(&["x"])).is_err());
        assert!(parse_command("palm-ssim", &paths(&["a", "b"])).is_err());
    }
}
