use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ipnet::IpNet;
use netipam_core::addr::parse_cidr;
use netipam_core::config::Config;
use netipam_core::types::{
    Aggregate, IpAddress, IpAddressRole, IpRange, Prefix, PrefixStatus, Rir, ScopeKey, Vrf,
};
use netipam_service::{
    utilization_key, Available, ChildrenOptions, FirstAvailable, Ipam, RebuildStats,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "netipam", about = "NetIPAM - IP address and VLAN management")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration file
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage VRFs
    #[command(subcommand)]
    Vrf(VrfCommand),
    /// Manage RIRs
    #[command(subcommand)]
    Rir(RirCommand),
    /// Manage aggregates
    #[command(subcommand)]
    Aggregate(AggregateCommand),
    /// Manage prefixes
    #[command(subcommand)]
    Prefix(PrefixCommand),
    /// Manage IP ranges
    #[command(subcommand)]
    Range(RangeCommand),
    /// Manage IP addresses
    #[command(subcommand)]
    Ip(IpCommand),
    /// Recompute prefix depth/children
    Rebuild {
        /// Only this VRF; `global` for the global table
        #[arg(long)]
        vrf: Option<String>,
    },
    /// Utilization percentage of an aggregate, prefix, range or VLAN group
    Utilization { kind: String, id: Uuid },
    /// First free prefix, address or VID under a parent
    NextAvailable {
        kind: String,
        id: Uuid,
        /// Prefix length to look for (prefixes only)
        #[arg(long)]
        length: Option<u8>,
    },
}

#[derive(Subcommand)]
enum VrfCommand {
    Create {
        name: String,
        #[arg(long)]
        rd: Option<String>,
        /// Allow duplicate prefixes and addresses inside the VRF
        #[arg(long)]
        allow_duplicates: bool,
    },
}

#[derive(Subcommand)]
enum RirCommand {
    Create {
        name: String,
        slug: String,
        #[arg(long)]
        private: bool,
    },
}

#[derive(Subcommand)]
enum AggregateCommand {
    Create {
        #[arg(value_parser = parse_cidr)]
        prefix: IpNet,
        rir: Uuid,
    },
}

#[derive(Args)]
struct ListingArgs {
    id: Uuid,
    /// Hide free space
    #[arg(long)]
    assigned_only: bool,
}

#[derive(Subcommand)]
enum PrefixCommand {
    Create {
        #[arg(value_parser = parse_cidr)]
        prefix: IpNet,
        #[arg(long)]
        vrf: Option<Uuid>,
        #[arg(long, default_value = "active")]
        status: PrefixStatus,
        #[arg(long)]
        pool: bool,
        #[arg(long)]
        mark_utilized: bool,
    },
    Delete { id: Uuid },
    /// Child prefixes with the free blocks between them
    Children(ListingArgs),
    /// Child addresses with the free runs between them
    Ips(ListingArgs),
}

#[derive(Subcommand)]
enum RangeCommand {
    Create {
        #[arg(value_parser = parse_cidr)]
        start: IpNet,
        #[arg(value_parser = parse_cidr)]
        end: IpNet,
        #[arg(long)]
        vrf: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum IpCommand {
    Create {
        #[arg(value_parser = parse_cidr)]
        address: IpNet,
        #[arg(long)]
        vrf: Option<Uuid>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        dns_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    init_logging(&config.logging);

    let ipam = Arc::new(Ipam::open(&config)?);
    info!(path = %config.database.path.display(), "database opened");

    match cli.command {
        Command::Vrf(VrfCommand::Create { name, rd, allow_duplicates }) => {
            let mut vrf = Vrf::new(&name);
            vrf.rd = rd;
            vrf.enforce_unique = !allow_duplicates;
            print_json(&ipam.save_vrf(vrf)?)
        }
        Command::Rir(RirCommand::Create { name, slug, private }) => {
            let mut rir = Rir::new(&name, &slug);
            rir.is_private = private;
            print_json(&ipam.save_rir(rir)?)
        }
        Command::Aggregate(AggregateCommand::Create { prefix, rir }) => {
            print_json(&ipam.save_aggregate(Aggregate::new(prefix, rir))?)
        }
        Command::Prefix(cmd) => prefix_command(&ipam, cmd),
        Command::Range(RangeCommand::Create { start, end, vrf }) => {
            print_json(&ipam.save_ip_range(IpRange::new(start, end, vrf))?)
        }
        Command::Ip(IpCommand::Create { address, vrf, role, dns_name }) => {
            let mut ip = IpAddress::new(address, vrf);
            ip.role = role.as_deref().map(parse_role).transpose()?;
            ip.dns_name = dns_name.unwrap_or_default();
            print_json(&ipam.save_ip_address(ip)?)
        }
        Command::Rebuild { vrf } => {
            let scopes = match vrf {
                Some(s) => vec![s.parse::<ScopeKey>()?],
                None => ipam.scopes()?,
            };
            print_json(&rebuild_scopes(ipam, scopes).await?)
        }
        Command::Utilization { kind, id } => {
            let percent = ipam.utilization(utilization_key(&kind, id)?)?;
            print_json(&serde_json::json!({ "kind": kind, "id": id, "utilization": percent }))
        }
        Command::NextAvailable { kind, id, length } => {
            let target = match (kind.as_str(), length) {
                ("prefix", None) => FirstAvailable::Prefix(id),
                ("prefix", Some(len)) => FirstAvailable::PrefixOfLength(id, len),
                ("range" | "ip-range", _) => FirstAvailable::IpRange(id),
                ("vlan-group", _) => FirstAvailable::VlanGroup(id),
                (other, _) => bail!("unknown parent kind: {other}"),
            };
            let found: Option<Available> = ipam.get_first_available(target)?;
            print_json(&found)
        }
    }
}

fn prefix_command(ipam: &Ipam, cmd: PrefixCommand) -> Result<()> {
    match cmd {
        PrefixCommand::Create { prefix, vrf, status, pool, mark_utilized } => {
            let mut p = Prefix::new(prefix, vrf);
            p.status = status;
            p.is_pool = pool;
            p.mark_utilized = mark_utilized;
            print_json(&ipam.save_prefix(p)?)
        }
        PrefixCommand::Delete { id } => print_json(&ipam.delete_prefix(id)?),
        PrefixCommand::Children(args) => {
            let options = ChildrenOptions {
                show_available: !args.assigned_only,
                show_assigned: true,
            };
            print_json(&ipam.get_children(args.id, options)?)
        }
        PrefixCommand::Ips(args) => print_json(&ipam.get_ip_listing(args.id, !args.assigned_only)?),
    }
}

/// Rebuild scopes in parallel; each scope is its own transaction.
async fn rebuild_scopes(ipam: Arc<Ipam>, scopes: Vec<ScopeKey>) -> Result<Vec<RebuildStats>> {
    let mut tasks = Vec::with_capacity(scopes.len());
    for scope in scopes {
        let ipam = ipam.clone();
        tasks.push(tokio::task::spawn_blocking(move || ipam.rebuild_hierarchy(scope)));
    }

    let mut stats = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await? {
            Ok(s) => stats.push(s),
            Err(e) => {
                error!("hierarchy rebuild error: {e}");
                return Err(e.into());
            }
        }
    }
    Ok(stats)
}

fn parse_role(s: &str) -> Result<IpAddressRole> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .with_context(|| format!("unknown IP address role: {s}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(config: &netipam_core::config::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    // stdout carries the JSON results
    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}
