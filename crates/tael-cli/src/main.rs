// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tael_cli::commands;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tael")]
#[command(author = "Maravilla Labs")]
#[command(version)]
#[command(about = "Attribute-language (TAL/METAL/I18N) template compiler", long_about = None)]
struct Cli {
    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and render a template with a JSON scope
    Render {
        /// Template file
        template: PathBuf,
        /// JSON file with template variables ('-' for stdin)
        #[arg(short, long)]
        data: Option<String>,
        /// Additional template search roots
        #[arg(short, long)]
        root: Vec<PathBuf>,
        /// Treat unknown control attributes and expression types as errors
        #[arg(long)]
        strict: bool,
        /// Collapse attribute whitespace to a single space
        #[arg(long)]
        trim: bool,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compile a template and report diagnostics
    Check {
        /// Template file
        template: PathBuf,
        /// Additional template search roots
        #[arg(short, long)]
        root: Vec<PathBuf>,
        /// Treat unknown control attributes and expression types as errors
        #[arg(long)]
        strict: bool,
    },
    /// List the macros a template defines
    Macros {
        /// Template file
        template: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Render {
            template,
            data,
            root,
            strict,
            trim,
            output,
        } => commands::render::run(&template, data.as_deref(), root, strict, trim, output.as_deref()),
        Commands::Check {
            template,
            root,
            strict,
        } => commands::check::run(&template, root, strict),
        Commands::Macros { template } => commands::macros::run(&template),
    }
}
