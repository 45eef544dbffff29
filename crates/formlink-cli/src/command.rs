use crate::cli::{BatchArgs, Cli, Commands, ControlsArgs, DialogArgs, ResolveArgs};
use crate::utils::{load_config, print_json, read_document};
use anyhow::{bail, Context, Result};
use formlink::{BatchStep, ElementFilter, Scope, Selector, Session};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref(), cli.port)?;
    let session = Arc::new(
        Session::new(cli.target.clone(), config).context("failed to create session")?,
    );
    info!(target_process = %cli.target, "session ready");

    match cli.command {
        Commands::Discover => handle_discover(&session).await,
        Commands::Controls(args) => handle_controls(&session, args).await,
        Commands::Resolve(args) => handle_resolve(&session, args).await,
        Commands::Dialog(args) => handle_dialog(&session, args).await,
        Commands::Batch(args) => handle_batch(session, args).await,
    }
}

async fn handle_discover(session: &Session) -> Result<()> {
    let endpoint = session.discover().await?;
    print_json(&endpoint)
}

async fn handle_controls(session: &Session, args: ControlsArgs) -> Result<()> {
    let filter = args.all.then(ElementFilter::all);
    let report = session.active_form_report(filter).await?;
    if let Some(warning) = &report.warning {
        warn!("{warning}");
    }
    print_json(&report)
}

async fn handle_resolve(session: &Session, args: ResolveArgs) -> Result<()> {
    let selector: Selector = args
        .selector
        .parse()
        .with_context(|| format!("invalid selector '{}'", args.selector))?;

    let mut options = session.resolve_options();
    if let Some(scope) = args.scope() {
        options.scope = scope;
    }
    if let Some(source) = args.source {
        options.source = source.into();
    }

    match args.match_policy {
        Some(policy) => {
            options.match_policy = policy;
            let element = session.resolve_one(&selector, &options).await?;
            print_json(&element)
        }
        None => {
            let resolution = session.resolve(&selector, &options).await?;
            print_json(&resolution)
        }
    }
}

async fn handle_dialog(session: &Session, args: DialogArgs) -> Result<()> {
    if args.all {
        print_json(&session.detect_dialogs().await?)
    } else {
        print_json(&session.detect_blocking_dialog().await?)
    }
}

async fn handle_batch(session: Arc<Session>, args: BatchArgs) -> Result<()> {
    let steps: Vec<BatchStep> = read_document(&args.file)
        .with_context(|| format!("failed to parse steps from {}", args.file.display()))?;
    info!(steps = steps.len(), file = %args.file.display(), "running batch");

    let stopper = session.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping batch");
            stopper.stop_execution();
        }
    });

    let scope = args.global.then_some(Scope::Global);
    let result = session.run_batch(&steps, scope).await;
    ctrl_c.abort();

    print_json(&result)?;
    if let Some(failed) = result.failed_step() {
        bail!(
            "batch stopped at step {}: {}",
            failed.index,
            failed
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("unknown error")
        );
    }
    Ok(())
}
