use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use relay::{build_registry, Mode, Registry};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "A socat-like relay: splice two addressable endpoints together", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, default_value_t = false, conflicts_with = "trace")]
    debug: bool,

    /// Enable trace logging
    #[arg(long, global = true, default_value_t = false, conflicts_with = "debug")]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Act as a fancy socat-like proxy tool
    #[command(long_about = "The proxy command needs two arguments which specify the data \
pipeline. The arguments are URLs; in some rare cases it might be required to \
escape certain parts of the url. For more information on URLs see the \
\"proxies\" command.")]
    Proxy(ProxyArgs),

    /// Show registered proxy plugins
    Proxies(ProxiesArgs),
}

#[derive(Args, Debug)]
struct ProxyArgs {
    /// Keep the listener running, servicing successive connections in series
    #[arg(short, long, default_value_t = false, conflicts_with = "parallel")]
    r#loop: bool,

    /// Serve multiple connections in parallel
    #[arg(short, long, default_value_t = false, conflicts_with = "loop")]
    parallel: bool,

    /// First endpoint URL
    url_left: String,

    /// Second endpoint URL
    url_right: String,
}

#[derive(Args, Debug)]
struct ProxiesArgs {
    /// Print full help for this scheme instead of the summary table
    scheme: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.trace {
        Level::TRACE
    } else if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    match cli.command {
        Commands::Proxy(args) => runtime.block_on(run_proxy(args)),
        Commands::Proxies(args) => run_proxies(args),
    }
}

async fn run_proxy(args: ProxyArgs) -> ExitCode {
    let registry = build_registry();

    let mode = match (args.r#loop, args.parallel) {
        (true, _) => Mode::Loop,
        (_, true) => Mode::Parallel,
        (false, false) => Mode::Single,
    };

    let left = match registry.find_and_bind(&args.url_left) {
        Ok(e) => e,
        Err(e) => return fail(&format!("left endpoint {:?}: {e}", args.url_left)),
    };
    let right = match registry.find_and_bind(&args.url_right) {
        Ok(e) => e,
        Err(e) => return fail(&format!("right endpoint {:?}: {e}", args.url_right)),
    };

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            cancel_on_signal.cancel();
        }
    });

    match relay::run_loop(left, right, mode, cancel).await {
        Ok(Some(code)) => ExitCode::from(code as u8),
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => fail(&e.to_string()),
    }
}

fn fail(message: &str) -> ExitCode {
    error!("{message}");
    eprintln!("error: {message}");
    ExitCode::FAILURE
}

fn run_proxies(args: ProxiesArgs) -> ExitCode {
    let registry = build_registry();
    match args.scheme {
        None => {
            print_registry_table(&registry);
            ExitCode::SUCCESS
        }
        Some(scheme) => match registry.get(&scheme) {
            Ok(descriptor) => {
                println!("{}", render_scheme_help(&descriptor));
                ExitCode::SUCCESS
            }
            Err(e) => fail(&e.to_string()),
        },
    }
}

fn print_registry_table(registry: &Registry) {
    let mut rows: Vec<(&'static str, &'static str)> = registry
        .values()
        .iter()
        .map(|d| (d.scheme, d.description))
        .collect();
    rows.sort_by_key(|(scheme, _)| *scheme);

    let width = rows.iter().map(|(s, _)| s.len()).max().unwrap_or(6).max(6);
    println!("{:width$}  DESCRIPTION", "SCHEME", width = width);
    for (scheme, description) in rows {
        println!("{scheme:width$}  {description}", width = width);
    }
}

/// Renders a descriptor's full help from the same Markdown-shaped template
/// for every scheme: description, option schema with defaults, examples.
fn render_scheme_help(descriptor: &relay::Descriptor) -> String {
    let mut out = format!("# {}\n\n{}\n", descriptor.scheme, descriptor.description);

    if !descriptor.string_options.is_empty()
        || !descriptor.bool_options.is_empty()
        || !descriptor.int_options.is_empty()
    {
        out.push_str("\n## Options\n\n");
        for o in descriptor.string_options {
            out.push_str(&format!("- `{}` (string, default `{:?}`): {}\n", o.name, o.default, o.description));
        }
        for o in descriptor.bool_options {
            out.push_str(&format!("- `{}` (bool, default `{}`): {}\n", o.name, o.default, o.description));
        }
        for o in descriptor.int_options {
            out.push_str(&format!("- `{}` (int, default `{}`): {}\n", o.name, o.default, o.description));
        }
    }

    if !descriptor.examples.is_empty() {
        out.push_str("\n## Examples\n\n");
        for example in descriptor.examples {
            out.push_str(&format!("    {example}\n"));
        }
    }

    out.push_str(&format!(
        "\nsupports_multiple={}, supports_streams={}\n",
        descriptor.supports_multiple, descriptor.supports_streams
    ));

    out
}
