//! `omni` command line entry point.
//!
//! Every command prints one JSON outcome on stdout, `{"ok": true, "result": ..}`
//! or `{"ok": false, "error": {"kind": .., "message": ..}}`, and exits non-zero
//! on failure. Logs go to stderr and follow `RUST_LOG`.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use omni_common::{CommonError, RequestContext};
use omni_retrieval::{Outcome, Pipeline, PipelineConfig, Question, RetrievalError};

use crate::cli::{Cli, Command};

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("omni: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> omni_retrieval::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => Ok(PipelineConfig::default()),
    }
}

fn request_context(cli: &Cli) -> RequestContext {
    let mut ctx = RequestContext::new(cli.user.clone());
    if let Some(secs) = cli.timeout {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }

    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
    ctx
}

/// Print `result` as a JSON outcome. Returns whether it succeeded.
fn emit<T: Serialize>(result: omni_retrieval::Result<T>) -> Result<bool> {
    let outcome = Outcome::from(result);
    let ok = outcome.is_ok();
    let json = serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?;
    println!("{json}");
    Ok(ok)
}

async fn read_texts(files: &[PathBuf]) -> omni_retrieval::Result<Vec<String>> {
    let mut texts = Vec::with_capacity(files.len());
    for file in files {
        let text = tokio::fs::read_to_string(file).await.map_err(|e| {
            RetrievalError::from(CommonError::InvalidInput(format!(
                "cannot read {}: {e}",
                file.display()
            )))
        })?;
        debug!("Read {} bytes from {}", text.len(), file.display());
        texts.push(text);
    }
    Ok(texts)
}

async fn run(cli: Cli) -> Result<bool> {
    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return emit::<()>(Err(e)),
    };
    info!("Using storage root {}", config.storage.root.display());

    let pipeline = match Pipeline::open(config).await {
        Ok(pipeline) => pipeline,
        Err(e) => return emit::<()>(Err(e)),
    };
    let ctx = request_context(&cli);

    match cli.command {
        Command::Ingest {
            files,
            index,
            overwrite,
        } => {
            let result = match read_texts(&files).await {
                Ok(texts) => {
                    pipeline
                        .ingest(&ctx, &texts, index.as_deref(), overwrite)
                        .await
                }
                Err(e) => Err(e),
            };
            emit(result)
        }
        Command::Upload { files } => {
            let result = async {
                let mut tickets = Vec::with_capacity(files.len());
                for text in read_texts(&files).await? {
                    tickets.push(pipeline.upload_text(&ctx, &text).await?);
                }
                Ok::<_, RetrievalError>(tickets)
            }
            .await;
            emit(result)
        }
        Command::IngestUploads {
            tickets,
            index,
            overwrite,
        } => emit(
            pipeline
                .ingest_uploads(&ctx, &tickets, index.as_deref(), overwrite)
                .await,
        ),
        Command::Query {
            question,
            index,
            model,
            top_k,
            instruction,
        } => {
            let mut question = Question::new(question);
            if let Some(index) = index {
                question = question.with_index(index);
            }
            if let Some(model) = model {
                question = question.with_model(model);
            }
            if let Some(top_k) = top_k {
                question = question.with_top_k(top_k);
            }
            if let Some(instruction) = instruction {
                question = question.with_instruction(instruction);
            }
            emit(pipeline.query(&ctx, &question).await)
        }
        Command::Models => emit(pipeline.model_choices(&ctx).await),
        Command::Indexes => emit(pipeline.indexes(&ctx).await),
    }
}
