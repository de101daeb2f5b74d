// ============================================================================
// SketchFE CLI — headless editing sessions driven by Rhai scripts
// ============================================================================
//
// Usage examples:
//   sketchfe --script strokes.rhai --output out.png
//   sketchfe -b photo.jpg -s lasso.rhai -o out.png
//   sketchfe -r "refs/*.png" -s trace.rhai -o out.png --config editor.json
//
// A session is created exactly as the interactive editor would, images are
// decoded into their layers, the script replays gestures and commands, and
// the white-backed composite is written as PNG.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use crate::config::EditorConfig;
use crate::io::{ImageSource, write_bytes};
use crate::ops::scripting::ScriptRunner;
use crate::session::EditorSession;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// SketchFE headless sketch editor.
#[derive(Parser, Debug)]
#[command(
    name = "sketchfe",
    about = "SketchFE headless layered sketch editor",
    long_about = "Create an editing session, replay a Rhai script of pointer gestures\n\
                  and layer commands against it, and export the result as PNG.\n\n\
                  Example:\n  \
                  sketchfe --base photo.jpg --script trace.rhai --output out.png"
)]
pub struct CliArgs {
    /// Rhai script to run against the session.
    /// If omitted, the loaded images are composited and exported as-is.
    #[arg(short, long, value_name = "SCRIPT.rhai")]
    pub script: Option<PathBuf>,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Image decoded into the base layer (overrides the config file).
    #[arg(short, long, value_name = "IMAGE")]
    pub base: Option<PathBuf>,

    /// Reference image(s), each loaded into its own reference layer.
    /// Glob patterns accepted (e.g. "refs/*.png").
    #[arg(short, long, num_args = 1.., value_name = "IMAGE")]
    pub reference: Vec<String>,

    /// JSON editor configuration.
    #[arg(short, long, value_name = "FILE.json")]
    pub config: Option<PathBuf>,

    /// Print script console output, notices, and timing; mirror the log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run one headless session and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match run_session(&args) {
        Ok(()) => {
            if args.verbose {
                println!(
                    "  → {} ({:.0}ms)",
                    args.output.display(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {}", e);
            log_err!("CLI run failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// Session pipeline
// ============================================================================

fn run_session(args: &CliArgs) -> Result<(), String> {
    // -- Step 1: Configure -----------------------------------------------
    let mut config = match &args.config {
        Some(path) => EditorConfig::load(path).map_err(|e| e.to_string())?,
        None => EditorConfig::default(),
    };
    if let Some(base) = &args.base {
        config.base_image = Some(base.clone());
    }

    let script_source = match &args.script {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .map_err(|e| format!("could not read script '{}': {}", path.display(), e))?,
        ),
        None => None,
    };

    // -- Step 2: Load images ---------------------------------------------
    let mut session = EditorSession::create(&config);
    for path in resolve_inputs(&args.reference) {
        session.add_reference_image(ImageSource::Path(path));
    }
    let applied = session.wait_for_decodes();
    if args.verbose {
        println!("  loaded {} image(s) into {} layer(s)", applied, session.layers().len());
    }

    // -- Step 3: Run script (optional) -----------------------------------
    let runner = ScriptRunner::new(session);
    if let Some(src) = &script_source {
        let result = runner.run(src);
        if args.verbose {
            for line in runner.console_output() {
                println!("  [script] {}", line);
            }
            for notice in runner.with_session(|s| s.take_notices()) {
                println!("  [notice] {}", notice);
            }
        }
        result.map_err(|e| format!("script error: {}", e))?;
    }

    // -- Step 4: Export --------------------------------------------------
    let bytes = runner
        .with_session(|s| s.export_png())
        .map_err(|e| format!("export failed: {}", e))?;
    write_bytes(&args.output, &bytes).map_err(|e| format!("save failed: {}", e))?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let before = result.len();
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                }
                if result.len() == before {
                    log_warn!("Reference pattern '{}' matched no files", pattern);
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                log_warn!("Invalid reference glob '{}': {}", pattern, e);
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}
