mod cli;
mod commands;
mod config;
mod entries;
mod error;
mod generate;
mod layout;
mod mcp;
mod numbering;
mod page_index;
mod page_range;
mod pdf;
mod render;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // stderr only; stdout carries the MCP transport
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Mcp => {
            mcp::run_server().await?;
        }
        Commands::Generate {
            path,
            entries,
            output,
            config,
            insert_at,
            offset,
            font,
            no_pages,
            auto_font_size,
        } => {
            let options = commands::generate::GenerateOptions {
                config,
                insert_at,
                offset,
                font,
                no_pages,
                auto_font_size,
            };
            commands::generate::run(&path, entries.as_deref(), &output, &options).await?;
        }
        Commands::Outline {
            path,
            active_page,
            json,
        } => {
            commands::outline::run(&path, active_page, json)?;
        }
        Commands::PageLabels {
            path,
            suggest,
            json,
        } => {
            commands::page_labels::run(&path, suggest.as_deref(), json)?;
        }
        Commands::Detect { path } => {
            commands::detect::run(&path)?;
        }
        Commands::Render {
            path,
            pages,
            output_dir,
            width,
        } => {
            commands::render::run(&path, &pages, &output_dir, width).await?;
        }
    }

    Ok(())
}
