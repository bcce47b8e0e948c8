use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{arg, command, ArgAction, Command};
use rayon::prelude::*;
use serde::Serialize;

use markscan::{interpret_sheet, DetectionConfig, MarkscanError, SheetInterpretation};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SheetReport {
    path: PathBuf,
    #[serde(flatten)]
    interpretation: SheetInterpretation,
}

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    let expected_questions = *matches
        .get_one::<u32>("questions")
        .expect("question count is required");
    let pretty = matches.get_flag("pretty");
    let sheet_paths = matches
        .get_many::<String>("sheets")
        .expect("at least one sheet image path is required")
        .cloned()
        .collect::<Vec<String>>();

    let config = match matches.get_one::<String>("config") {
        Some(config_path) => match load_config(Path::new(config_path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                exit(1);
            }
        },
        None => DetectionConfig::default(),
    };

    // Sheets are independent units of work; one failure never aborts the
    // others.
    let results = sheet_paths
        .par_iter()
        .map(|path| (path, process_sheet(Path::new(path), expected_questions, &config)))
        .collect::<Vec<(&String, Result<SheetReport, MarkscanError>)>>();

    let mut failures = 0;
    for (path, result) in results {
        match result {
            Ok(report) => {
                let json = if pretty {
                    serde_json::to_string_pretty(&report)
                } else {
                    serde_json::to_string(&report)
                };
                match json {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Error serializing result for {}: {}", path, e);
                        failures += 1;
                    }
                }
            }
            Err(e) => {
                eprintln!("Error processing {}: {}", path, e);
                failures += 1;
            }
        }
    }

    if failures == sheet_paths.len() {
        exit(1);
    }
}

fn process_sheet(
    path: &Path,
    expected_questions: u32,
    config: &DetectionConfig,
) -> Result<SheetReport, MarkscanError> {
    let img = image::open(path)
        .map_err(|source| MarkscanError::ImageOpen {
            path: path.to_path_buf(),
            source,
        })?
        .into_luma8();
    let interpretation = interpret_sheet(&img, expected_questions, config)?;
    Ok(SheetReport {
        path: path.to_path_buf(),
        interpretation,
    })
}

fn load_config(path: &Path) -> Result<DetectionConfig, String> {
    let json = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

fn cli() -> Command {
    command!()
        .arg(
            arg!(-q --questions <COUNT> "Expected number of questions on each sheet")
                .required(true)
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(arg!(-c --config <PATH> "Path to a detection config JSON file"))
        .arg(
            arg!(-p --pretty "Pretty-print the JSON output")
                .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(sheets: <SHEET_IMAGE> "Paths to sheet images")
                .num_args(1..)
                .required(true),
        )
}
