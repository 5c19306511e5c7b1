//! Zentinel HTTP Stub - route file inspector

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_http_stub::routes::flatten;
use zentinel_http_stub::transport::Offline;
use zentinel_http_stub::{Method, RequestRecord, RouteFile};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-http-stub",
    about = "Inspect and dry-run HTTP stub route files",
    version
)]
struct Args {
    /// Path to route file
    #[arg(short, long, default_value = "stub-routes.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print a sample route file and exit
    #[arg(long)]
    print_config: bool,

    /// Validate the route file and exit
    #[arg(long)]
    validate: bool,

    /// List flattened route entries in match order
    #[arg(long)]
    list: bool,

    /// Dispatch one request URL against the route file
    #[arg(long, value_name = "URL")]
    probe: Option<String>,

    /// Method for --probe
    #[arg(short, long, default_value = "get")]
    method: Method,
}

const SAMPLE_CONFIG: &str = r#"settings:
  isolation: true
routes:
  - address: { type: exact, value: "http://example.com/api" }
    times: 1
    methods:
      get:
        body: { type: json, content: { message: "Hello, World!" } }
      post:
        status: 201
  - address: { type: regex, pattern: 'http://example\.com/users/\d+' }
    response:
      status: 200
      body: { type: text, content: "user" }
"#;

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        print!("{}", SAMPLE_CONFIG);
        return Ok(());
    }

    if !args.config.exists() {
        anyhow::bail!("Route file not found: {:?}", args.config);
    }
    info!(path = ?args.config, "Loading route file");
    let file = RouteFile::from_file(&args.config)?;
    let table = file.to_route_table()?;
    let flat = flatten(&table);

    if args.validate {
        println!(
            "Route table is valid ({} routes, {} entries)",
            table.len(),
            flat.entries.len()
        );
        return Ok(());
    }

    if args.list {
        for entry in &flat.entries {
            match entry.expected_count {
                Some(n) => println!("{} {} [times={}]", entry.method, entry.key, n),
                None => println!("{} {}", entry.method, entry.key),
            }
        }
        return Ok(());
    }

    if let Some(url) = args.probe {
        let scope = file.to_scope()?;
        let request = RequestRecord::new().url(url).method(args.method);
        let response = scope.dispatch(request, &Offline)?;
        println!("{}", response.status);
        println!("{}", response.text());
        scope.validate()?;
        return Ok(());
    }

    println!(
        "{} routes loaded; use --validate, --list or --probe <URL>",
        table.len()
    );
    Ok(())
}
