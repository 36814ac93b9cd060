// ========================================================================================
//
//                          THE PROGNOS ORCHESTRATOR
//
// ========================================================================================
//
// The binary owns the application lifecycle: argument parsing, artifact
// loading, record validation, the scoring pass, and report output. The
// library below it stays free of process concerns; everything that prints,
// exits, or touches stdout lives here.
//
// Startup failures (unreadable models directory, missing manifest, malformed
// record) are fatal and reported on stderr. Per-disease failures are not:
// they travel inside the report, so a half-broken model set still produces
// every prediction it can.

use clap::Parser;
use prognos::engine;
use prognos::narrative::InputTemplate;
use prognos::schema::{FieldValue, HealthRecord};
use prognos::store::PipelineStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[clap(
    name = "prognos",
    version,
    about = "A multi-model engine for chronic disease risk prediction."
)]
struct Args {
    /// Directory holding the trained model artifacts.
    models_dir: PathBuf,

    /// Path to the health record to score, as a flat JSON object.
    #[clap(long)]
    input: PathBuf,

    /// Where to write the JSON report. Defaults to stdout.
    #[clap(long)]
    output: Option<PathBuf>,

    /// Annotated field-dictionary template for the narrative generator.
    #[clap(long, requires = "narrative_out")]
    narrative_template: Option<PathBuf>,

    /// Where to write the rendered narrative input block.
    #[clap(long, requires = "narrative_template")]
    narrative_out: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    // --- Phase 1: Load the model store ---
    eprintln!("> Loading model artifacts from {}", args.models_dir.display());
    let store = match PipelineStore::load(&args.models_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Fatal error while loading model artifacts: {e}");
            process::exit(1);
        }
    };
    eprintln!(
        "> Store ready: {} of {} manifest diseases servable.",
        store.len(),
        store.manifest().len()
    );

    // --- Phase 2: Read and validate the record ---
    let record = match read_record(&args.input, &store) {
        Ok(record) => record,
        Err(e) => {
            eprintln!("Error reading health record '{}': {e}", args.input.display());
            process::exit(1);
        }
    };
    eprintln!("> Record loaded with {} fields.", record.len());

    // --- Phase 3: Score every disease ---
    let report = engine::predict_all(&store, &record);
    for (disease_id, failure) in report.failures() {
        eprintln!("> Warning: no prediction for '{disease_id}': {}", failure.message);
    }
    eprintln!(
        "> Scored {} diseases ({} failed).",
        report.results().count(),
        report.failures().count()
    );

    // --- Phase 4: Emit the report ---
    let json = match serde_json::to_string_pretty(&report) {
        Ok(json) => json,
        Err(e) => {
            eprintln!("Error serializing report: {e}");
            process::exit(1);
        }
    };
    match &args.output {
        Some(path) => {
            if let Err(e) = fs::write(path, json) {
                eprintln!("Error writing report to '{}': {e}", path.display());
                process::exit(1);
            }
            eprintln!("> Report written to {}", path.display());
        }
        None => println!("{json}"),
    }

    // --- Phase 5: Optional narrative input block ---
    if let (Some(template_path), Some(out_path)) = (&args.narrative_template, &args.narrative_out)
    {
        let text = match fs::read_to_string(template_path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!(
                    "Error reading narrative template '{}': {e}",
                    template_path.display()
                );
                process::exit(1);
            }
        };
        let block = InputTemplate::parse(&text).render(&record);
        if let Err(e) = fs::write(out_path, block) {
            eprintln!(
                "Error writing narrative input to '{}': {e}",
                out_path.display()
            );
            process::exit(1);
        }
        eprintln!("> Narrative input written to {}", out_path.display());
    }
}

/// Parses the record JSON and validates it against the union schema of the
/// loaded models, so a mistyped field is rejected here rather than surfacing
/// as a per-disease failure later.
fn read_record(path: &PathBuf, store: &PipelineStore) -> Result<HealthRecord, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    let values: BTreeMap<String, FieldValue> =
        serde_json::from_str(&text).map_err(|e| format!("not a flat JSON object: {e}"))?;
    HealthRecord::validated(values, store.record_schema()).map_err(|e| e.to_string())
}
