//! SOAP engine demo binary.
//!
//! Wires a small echo service into the engine, then either prints the WSDL
//! for an endpoint URL or runs one envelope through the request pipeline:
//!
//! `soap-engine --wsdl http://localhost:8080/echo.wsdl`
//! `soap-engine --input request.xml`

use anyhow::{Context, Result};
use clap::Parser;
use soap_engine::{
    Application, DispatchError, EngineConfig, Member, MethodDescriptor, RequestContext, Service,
    TypeDef, ValidatingApplication, Value,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Print the WSDL for this endpoint URL and exit
    #[arg(long)]
    wsdl: Option<String>,

    /// Envelope file to run through the pipeline (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Demo service exposing a handful of echo-style operations.
struct EchoService {
    methods: Vec<MethodDescriptor>,
}

impl EchoService {
    fn new(tns: &str) -> Self {
        Self {
            methods: vec![
                MethodDescriptor::rpc(
                    tns,
                    "echoString",
                    vec![Member::new("s", TypeDef::string())],
                    Some(TypeDef::string()),
                )
                .with_doc("Returns its string argument unchanged."),
                MethodDescriptor::rpc(
                    tns,
                    "echoStrings",
                    vec![Member::new("values", TypeDef::array(tns, TypeDef::string()))],
                    Some(TypeDef::array(tns, TypeDef::string())),
                ),
                MethodDescriptor::rpc(
                    tns,
                    "add",
                    vec![
                        Member::new("a", TypeDef::int()),
                        Member::new("b", TypeDef::int()),
                    ],
                    Some(TypeDef::int()),
                ),
            ],
        }
    }
}

impl Service for EchoService {
    fn name(&self) -> &str {
        "Echo"
    }

    fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    fn invoke(
        &self,
        method: &MethodDescriptor,
        params: Vec<Value>,
        _ctx: &mut RequestContext,
    ) -> Result<Value, DispatchError> {
        match method.name.as_str() {
            "echoString" | "echoStrings" => {
                Ok(params.into_iter().next().unwrap_or(Value::Null))
            }
            "add" => {
                let mut args = params.into_iter();
                let a = args.next().and_then(|v| v.as_i64()).unwrap_or(0);
                let b = args.next().and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(Value::Int(a + b))
            }
            other => Err(anyhow::anyhow!("no implementation for {other}").into()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Starting SOAP engine v{}", env!("CARGO_PKG_VERSION"));

    let config = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config)
            .context("Failed to read config file")?;
        serde_yaml::from_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        EngineConfig::default()
    };

    let services: Vec<Arc<dyn Service>> = vec![Arc::new(EchoService::new(&config.target_namespace))];
    let validate = config.validate_requests;
    let app = Application::new(services, &config)?;

    if let Some(url) = args.wsdl {
        let wsdl = app.get_wsdl(&url)?;
        let mut stdout = std::io::stdout().lock();
        std::io::Write::write_all(&mut stdout, wsdl)?;
        return Ok(());
    }

    let payload = match &args.input {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let response = if validate {
        let app = ValidatingApplication::new(app)?;
        app.handle_request(&payload, None)?
    } else {
        app.handle_request(&payload, None)?
    };

    let mut stdout = std::io::stdout().lock();
    std::io::Write::write_all(&mut stdout, &response)?;
    Ok(())
}
