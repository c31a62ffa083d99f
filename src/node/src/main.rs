//! Control-plane node binary: a resource-pooling daemon that accepts
//! Function deployments and fans them out across local and peer-discovered
//! providers.

mod cli;
mod rest;
mod server;
mod state;

use std::path::PathBuf;

use structopt::StructOpt;

use cli::Command;

#[derive(StructOpt, Debug)]
#[structopt(name = "mesh", about = "Resource-pooling control plane for Function deployments")]
struct Opt {
	/// Path to the node's TOML configuration file.
	#[structopt(short = "c", long = "config", env = "MESH_CONFIG_FILE", default_value = "/etc/mesh.toml")]
	config_file: PathBuf,

	/// REST façade address to reach for admin subcommands, if different
	/// from what the config file's `rest_bind_addr` says.
	#[structopt(long = "rest-host", env = "MESH_REST_HOST")]
	rest_host: Option<String>,

	#[structopt(subcommand)]
	cmd: Command,
}

#[tokio::main]
async fn main() {
	let panic_version = env!("CARGO_PKG_VERSION");
	std::panic::set_hook(Box::new(move |panic_info| {
				eprintln!("======== PANIC (internal mesh node error) ========");
				eprintln!("{}", panic_info);
				eprintln!();
				eprintln!("This is an internal error; the process will now exit so it can be");
				eprintln!("restarted from a fresh, known state.");
				eprintln!();
				eprintln!("MESH VERSION: {}", panic_version);
				eprintln!();
				eprintln!("BACKTRACE:");
				eprintln!("{:?}", backtrace::Backtrace::new());
				std::process::abort();
	}));

	let opt = Opt::from_args();

	if std::env::var("RUST_LOG").is_err() {
		let default_log = match opt.cmd {
			Command::Server => "mesh=info,mesh_registry=info,mesh_rpc=info,mesh_deploy=info",
			_ => "mesh=warn",
		};
		std::env::set_var("RUST_LOG", default_log);
	}
	tracing_subscriber::fmt()
	.with_writer(std::io::stderr)
	.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
	.init();

	let res = match opt.cmd {
		Command::Server => server::run_server(opt.config_file).await.map_err(|e| e.to_string()),
		other => run_admin_command(other, &opt.config_file, opt.rest_host).await,
	};

	if let Err(e) = res {
		eprintln!("Error: {}", e);
		std::process::exit(1);
	}
}

async fn run_admin_command(cmd: Command, config_file: &PathBuf, rest_host: Option<String>) -> Result<(), String> {
	let rest_addr = match rest_host {
		Some(addr) => addr,
		None => {
			let config = mesh_util::config::read_config(config_file).map_err(|e| {
					format!(
						"unable to read configuration file {}. Configuration file is needed because --rest-host is not provided on the command line: {}",
						config_file.display(),
						e
					)
			})?;
			config.rest_bind_addr.to_string()
		}
	};

	cli::dispatch(cmd, &rest_addr).await.map_err(|e| e.to_string())
}
