use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use confqa::config::EmbedderArg;
use confqa::{
    AnswerModel, Assistant, Cli, ConfluenceClient, Embedder, EmbeddingStore, HashingEmbedder,
    OpenAiChat, OpenAiEmbedder, RefreshTracker,
};
use tokio::runtime::Builder;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let wiki = ConfluenceClient::new(
        &cli.base_url,
        cli.confluence_user.clone(),
        cli.confluence_api_token.clone(),
        cli.retry_policy()?,
        cli.page_limit,
        cli.fetch_timeout(),
    )?;

    // blocking model clients must be built before entering the runtime
    let embedder = build_embedder(&cli)?;
    let answerer = if cli.question.is_some() {
        Some(build_answerer(&cli)?)
    } else {
        None
    };

    let assistant = Assistant::new(
        wiki,
        embedder,
        EmbeddingStore::new(&cli.embeddings_file),
        RefreshTracker::new(&cli.timestamp_file, cli.stale_ttl()),
        cli.assistant_settings(),
    );

    let rt = Builder::new_current_thread().enable_all().build()?;
    rt.block_on(run(&cli, &assistant, answerer))
}

async fn run<W: confqa::WikiSource>(
    cli: &Cli,
    assistant: &Assistant<W>,
    answerer: Option<Arc<dyn AnswerModel>>,
) -> Result<()> {
    if cli.full_rebuild {
        println!("Generating embeddings for the entire wiki...");
        let count = assistant.rebuild_all().await?;
        println!("Embedded {count} pages.");
        return Ok(());
    }

    let Some(question) = &cli.question else {
        if assistant.needs_refresh(cli.force_refresh) {
            let count = assistant.refresh().await?;
            println!("Embedded {count} pages.");
        } else {
            println!("Embeddings are up to date.");
        }
        return Ok(());
    };

    let answerer = answerer.context("answer model not configured")?;
    let answer = assistant.ask(question, cli.force_refresh, answerer).await?;
    println!("Top relevant page IDs: {}", answer.page_ids.join(", "));
    println!("Answer: {}", answer.text);
    Ok(())
}

fn build_embedder(cli: &Cli) -> Result<Arc<dyn Embedder>> {
    match cli.embedder {
        EmbedderArg::Openai => {
            let api_key = cli
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY must be set for the openai embedder")?;
            Ok(Arc::new(OpenAiEmbedder::new(
                api_key,
                cli.openai_base_url.clone(),
                cli.embed_model.clone(),
                cli.embed_dimensions,
                Duration::from_secs(cli.embed_timeout_secs.max(1)),
                cli.embed_max_retries,
                cli.embed_batch_size,
            )?))
        }
        EmbedderArg::Hashing => Ok(Arc::new(HashingEmbedder::new(cli.hash_dimensions))),
    }
}

fn build_answerer(cli: &Cli) -> Result<Arc<dyn AnswerModel>> {
    let api_key = cli
        .openai_api_key
        .clone()
        .context("OPENAI_API_KEY must be set to answer questions")?;
    Ok(Arc::new(OpenAiChat::new(
        api_key,
        cli.openai_base_url.clone(),
        cli.chat_model.clone(),
        cli.chat_temperature,
        Duration::from_secs(cli.chat_timeout_secs.max(1)),
    )?))
}
