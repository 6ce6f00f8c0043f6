//! # buildmesh
//!
//! Command-line driver: inspect the node wire protocol and submit builds
//! to a remote node through the build coordinator.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use buildmesh_coordinator::observability::init_logging;
use buildmesh_coordinator::{BuildCoordinator, CoordinatorConfig, CoordinatorError, NodeEngine};
use buildmesh_protocol::{decode_header, BuildRequestData, NodePacketType, PacketCatalog};

#[derive(Parser)]
#[command(name = "buildmesh")]
#[command(about = "Build submission coordinator and node protocol tools", long_about = None)]
struct Cli {
    /// Configuration file (defaults to <config dir>/buildmesh/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the packet catalog as JSON
    Catalog,

    /// Decode a raw packet type byte (decimal or 0x-prefixed hex)
    DecodeHeader {
        byte: String,
    },

    /// Build a project on a remote node
    Build {
        /// Node address, host:port
        #[arg(short, long)]
        node: String,

        /// Project to build
        project: String,

        /// Target to build; repeatable
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Global property as NAME=VALUE; repeatable
        #[arg(short, long = "property")]
        properties: Vec<String>,
    },
}

#[derive(Serialize)]
struct CatalogEntry {
    name: String,
    value: u8,
    control: bool,
    versioned: bool,
    version: u8,
}

#[derive(Serialize)]
struct DecodedHeader {
    raw: u8,
    packet_type: u8,
    name: Option<String>,
    extended_header: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();
    let config = CoordinatorConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging.level, config.logging.format);

    match cli.command {
        Commands::Catalog => {
            print_catalog(&config.protocol.catalog())?;
            Ok(true)
        }
        Commands::DecodeHeader { byte } => {
            let raw = parse_byte(&byte)?;
            let (packet_type, extended_header) = decode_header(raw);
            let decoded = DecodedHeader {
                raw,
                packet_type,
                name: NodePacketType::try_from(packet_type).ok().map(|t| t.to_string()),
                extended_header,
            };
            println!("{}", serde_json::to_string_pretty(&decoded)?);
            Ok(true)
        }
        Commands::Build {
            node,
            project,
            targets,
            properties,
        } => {
            let mut request = BuildRequestData::new(project);
            for target in targets {
                request = request.with_target(target);
            }
            for property in properties {
                let (name, value) = property
                    .split_once('=')
                    .with_context(|| format!("property `{property}` is not NAME=VALUE"))?;
                request = request.with_property(name, value);
            }
            build(config, &node, request)
        }
    }
}

fn print_catalog(catalog: &PacketCatalog) -> Result<()> {
    let entries: Vec<_> = NodePacketType::ALL
        .iter()
        .map(|&packet_type| CatalogEntry {
            name: packet_type.to_string(),
            value: packet_type.as_u8(),
            control: packet_type.is_control(),
            versioned: catalog.supports_versioning(packet_type),
            version: catalog.current_version(packet_type),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn parse_byte(text: &str) -> Result<u8> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.with_context(|| format!("`{text}` is not a byte value"))
}

fn build(config: CoordinatorConfig, node: &str, request: BuildRequestData) -> Result<bool> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let _guard = runtime.enter();

    let connect_timeout = Duration::from_secs(config.node.connect_timeout_secs);
    let stream = runtime
        .block_on(tokio::time::timeout(
            connect_timeout,
            tokio::net::TcpStream::connect(node),
        ))
        .map_err(|_| CoordinatorError::NodeUnavailable(format!("timed out connecting to {node}")))?
        .map_err(|e| CoordinatorError::NodeUnavailable(format!("{node}: {e}")))?;
    tracing::info!(node, "Connected to node");

    let engine = NodeEngine::spawn(stream, config.protocol.catalog());
    let wait_timeout = config.submission.wait_timeout_secs.map(Duration::from_secs);
    let legacy_threading = config.submission.legacy_threading;
    let coordinator = BuildCoordinator::new(config, engine, runtime.handle().clone());

    let result = match wait_timeout {
        None => coordinator.build(request)?,
        Some(timeout) => build_with_timeout(&coordinator, request, timeout, legacy_threading)?,
    };
    coordinator.shutdown("build driver exiting");

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.succeeded())
}

fn build_with_timeout(
    coordinator: &Arc<BuildCoordinator>,
    request: BuildRequestData,
    timeout: Duration,
    legacy_threading: bool,
) -> Result<buildmesh_protocol::BuildResult> {
    let submission = coordinator.pend_build_request(request)?;
    submission.execute_async_with(None, None, legacy_threading)?;
    if !submission.wait_for_completion(Some(timeout))? {
        tracing::warn!(submission_id = %submission.id(), ?timeout, "Build timed out");
        // Completion may have won the race; the first result stands.
        if let Err(e) = coordinator.cancel(submission.id(), "build timed out") {
            tracing::debug!(error = %e, "Cancel after timeout had no effect");
        }
        submission.wait_for_completion(None)?;
    }
    submission
        .result()
        .context("submission completed without a result")
}
