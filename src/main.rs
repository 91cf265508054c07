//! MongoLens command-line front end
//!
//! Runs one query against one collection through the same execution
//! controller the browser uses, and prints the resulting page.
//!
//! # Usage
//!
//! ```bash
//! mongolens mongodb://localhost:27017/shop -C orders -e '{ status: "open" }'
//! mongolens mongodb://localhost:27017/shop -C orders -e 'db.orders.find({}).sort({ total: -1 })' --force
//! mongolens history
//! ```

use std::sync::Arc;

use tracing::{Level, debug};
use tracing_subscriber::EnvFilter;

use mongolens::cli::{
    CLI_CONNECTION_ID, CliInterface, render_diagnostics, render_documents, render_explain,
    render_size_warning, render_summary,
};
use mongolens::collaborator::MongoCollaborator;
use mongolens::error::Result;
use mongolens::schema::SchemaCache;
use mongolens::validator::{Severity, Validator};
use mongolens::{ExecutionController, ExecutionOutcome};

/// Application entry point
#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands, `--check`, or run the query
///
/// # Returns
/// * `Result<i32>` - Process exit code or error
async fn run() -> Result<i32> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(0);
    }

    if cli.args().check {
        return Ok(check_query(&cli));
    }

    cli.print_banner();
    run_query(&cli).await
}

/// Validate the query text without connecting
fn check_query(cli: &CliInterface) -> i32 {
    let diagnostics = Validator::validate(cli.query_text(), None);
    if diagnostics.is_empty() {
        println!("No problems found");
        return 0;
    }

    println!("{}", render_diagnostics(&diagnostics));
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        1
    } else {
        0
    }
}

/// Connect, run the query and print the page
async fn run_query(cli: &CliInterface) -> Result<i32> {
    let key = cli.collection_key()?;
    let config = cli.config();

    let mongo = MongoCollaborator::new(config.connection.clone());
    mongo
        .connect(CLI_CONNECTION_ID, &cli.get_connection_uri())
        .await?;

    let controller = ExecutionController::new(
        key,
        Arc::new(mongo),
        Arc::new(SchemaCache::new()),
        cli.load_history(),
        &config.query,
    );
    controller.set_read_only(cli.args().read_only);
    controller.set_query_text(cli.query_text());

    if cli.args().explain {
        let explain = controller.explain_query().await?;
        println!("{}", render_explain(&explain));
        return Ok(0);
    }

    // Ctrl+C abandons the running query
    let cancel_handle = {
        let controller = controller.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => controller.cancel_query(),
                Err(err) => eprintln!("Failed to listen for Ctrl+C: {}", err),
            }
        })
    };

    let outcome = execute_page(cli, &controller).await;
    cancel_handle.abort();

    report_outcome(cli, &controller, outcome?)
}

/// Execute the requested page, resolving a size warning per the flags
async fn execute_page(
    cli: &CliInterface,
    controller: &ExecutionController,
) -> Result<ExecutionOutcome> {
    let mut outcome = controller.execute_query().await?;

    for page in 0..cli.args().page {
        if !matches!(outcome, ExecutionOutcome::Completed { .. }) {
            break;
        }
        if !controller.snapshot().paging.has_next_page() {
            debug!("Stopped at page {}: no further pages", page);
            break;
        }
        outcome = controller.next_page().await?;
    }

    if let ExecutionOutcome::WarningPending(_) = outcome {
        if cli.args().force {
            outcome = controller.bypass_size_warning_once().await?;
        } else if cli.args().shrink {
            outcome = controller.shrink_page_to_suggestion().await?;
        }
    }

    Ok(outcome)
}

/// Print the outcome and map it to an exit code
fn report_outcome(
    cli: &CliInterface,
    controller: &ExecutionController,
    outcome: ExecutionOutcome,
) -> Result<i32> {
    let view = controller.snapshot();
    match outcome {
        ExecutionOutcome::Completed { .. } => {
            if !view.documents.is_empty() {
                println!("{}", render_documents(&view.documents));
            }
            if !cli.args().quiet {
                eprintln!("{}", render_summary(&view));
                for issue in &view.issues {
                    eprintln!("Document {}: {}", issue.index, issue.message);
                }
            }
            Ok(0)
        }
        ExecutionOutcome::WarningPending(estimate) => {
            eprintln!("{}", render_size_warning(&estimate));
            Ok(2)
        }
        ExecutionOutcome::Failed(report) => {
            eprintln!("Error: {}", report.summary);
            if report.details != report.summary {
                eprintln!("{}", report.details);
            }
            Ok(1)
        }
        ExecutionOutcome::TimedOut => {
            let message = view
                .error
                .map(|e| e.summary)
                .unwrap_or_else(|| "Query timed out".to_string());
            eprintln!("Error: {}", message);
            Ok(1)
        }
        ExecutionOutcome::Superseded => {
            eprintln!("Query cancelled");
            Ok(130)
        }
    }
}

/// Initialize logging system based on verbosity level
///
/// # Arguments
/// * `cli` - CLI interface with verbosity settings
fn initialize_logging(cli: &CliInterface) {
    let level = if cli.args().very_verbose {
        Level::TRACE
    } else if cli.args().verbose {
        Level::DEBUG
    } else {
        cli.config().logging.level.to_tracing_level()
    };

    // MONGOLENS_LOG takes directives like RUST_LOG and wins over the flags
    let filter = EnvFilter::try_from_env("MONGOLENS_LOG")
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.config().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
