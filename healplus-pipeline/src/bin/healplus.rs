//! HealPlus command-line driver.
//!
//! Usage: healplus [--config <path>] <command>
//!
//! Logs go to stderr (`RUST_LOG`, `HEALPLUS_LOG_FORMAT=json`); results are
//! printed to stdout as JSON.

use healplus_core::{AssessmentSubmission, ClientConfig, PatientId, SystemClock, WoundId};
use healplus_gateway::GatewayClient;
use healplus_pipeline::{
    init_tracing, parse_args, AssessmentOrchestrator, CliError, Command, LogFormat,
};
use healplus_storage::{
    CollectionCache, CollectionReader, CollectionView, RestDocumentStore, SubscriptionManager,
};
use serde_json::Value;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = init_tracing(LogFormat::from_env()) {
        eprintln!("failed to initialize logging: {}", err);
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "healplus failed");
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), CliError> {
    let command = parse_args(std::env::args().skip(1))?;
    let config = ClientConfig::load()?;

    match command {
        Command::Assess {
            wound_id,
            image_uri,
            payload,
            sync_fhir,
        } => {
            let submission = AssessmentSubmission {
                wound_id: WoundId::from(wound_id),
                image_uri,
                payload: match payload {
                    Some(path) => read_payload(&path)?,
                    None => Value::Object(Default::default()),
                },
            };
            assess(&config, &submission, sync_fhir).await
        }
        Command::FhirPull { patient_id } => {
            let gateway = GatewayClient::from_config(&config.endpoints)?;
            let orchestrator = AssessmentOrchestrator::new(gateway, config.analysis_poll.clone());
            let pulled = orchestrator.fhir_pull(&PatientId::from(patient_id)).await?;
            println!("{}", serde_json::to_string_pretty(&pulled)?);
            Ok(())
        }
        Command::Watch { path } => watch(&config, &path).await,
    }
}

async fn assess(
    config: &ClientConfig,
    submission: &AssessmentSubmission,
    sync_fhir: bool,
) -> Result<(), CliError> {
    let gateway = GatewayClient::from_config(&config.endpoints)?;
    let orchestrator = AssessmentOrchestrator::new(gateway, config.analysis_poll.clone());
    let assessment = orchestrator.run(submission, sync_fhir).await?;

    println!("{}", serde_json::to_string_pretty(&assessment)?);
    if assessment.failure().is_some() {
        return Err(CliError::Incomplete(assessment.describe()));
    }
    if assessment.is_degraded() {
        warn!(status = %assessment.describe(), "assessment degraded");
    }
    Ok(())
}

async fn watch(config: &ClientConfig, path: &str) -> Result<(), CliError> {
    let store = Arc::new(RestDocumentStore::from_config(&config.endpoints)?);
    let cache = Arc::new(CollectionCache::from_settings(&config.cache, Arc::new(SystemClock)));
    let reader = CollectionReader::new(store.clone(), Arc::clone(&cache))
        .with_stale_time(config.cache.stale_time());
    let live = SubscriptionManager::new(store, cache);

    let view = CollectionView::new(path, None, reader, live);
    if let Err(err) = view.open(true).await {
        warn!(path, error = %err, "initial read failed, waiting for live snapshots");
    }
    info!(path, "watching collection");

    // While the subscription is alive its next snapshot replaces a failed
    // read. An error on a dead subscription ends the watch.
    let mut state = view.subscribe_state();
    loop {
        {
            let current = state.borrow_and_update();
            match &current.error {
                Some(err) if !view.is_realtime() => return Err(err.clone().into()),
                Some(_) => {}
                None if !current.loading => {
                    println!("{}", serde_json::to_string(&current.records)?)
                }
                None => {}
            }
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    view.disable_realtime();
    Ok(())
}

fn read_payload(path: &Path) -> Result<Value, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}
