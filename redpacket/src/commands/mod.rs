use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use redpacket::{
    admin::{self, AdminOutcome},
    balances, batch,
    config::Config,
    draw,
    error::Result,
    reconcile::{self, SqlKey, SqlOptions},
    roster::{self, RosterPolicy},
    utils::format_ether,
    ChainGateway, FailurePolicy,
};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    Local,
    Sepolia,
    Mainnet,
    Node(String),
}

const LOCAL_URL: &str = "http://localhost:8545";
const SEPOLIA_URL: &str = "https://ethereum-sepolia-rpc.publicnode.com";
const MAINNET_URL: &str = "https://ethereum-rpc.publicnode.com";

impl Network {
    pub fn get_url(&self) -> String {
        match self {
            Network::Local => LOCAL_URL.to_owned(),
            Network::Sepolia => SEPOLIA_URL.to_owned(),
            Network::Mainnet => MAINNET_URL.to_owned(),
            Network::Node(url) => url.to_owned(),
        }
    }

    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Local => Some(31337),
            Network::Sepolia => Some(11155111),
            Network::Mainnet => Some(1),
            Network::Node(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Network::Local => "local",
            Network::Sepolia => "sepolia",
            Network::Mainnet => "mainnet",
            Network::Node(_) => "node",
        }
    }

    /// Point the config at this network. An explicit node keeps whatever
    /// chain id the config file expects.
    pub fn apply(&self, config: &mut Config) {
        config.chain.endpoint = self.get_url();
        config.chain.name = self.name().to_owned();
        if let Some(id) = self.chain_id() {
            config.chain.chain_id = Some(id);
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "sepolia" => Ok(Self::Sepolia),
            "mainnet" => Ok(Self::Mainnet),
            network if network.starts_with("node") => {
                // --network node,http://10.0.0.2:8545
                let segs: Vec<&str> = network.splitn(2, ',').collect();
                match segs.get(1) {
                    Some(node) if !node.is_empty() => Ok(Self::Node(node.to_string())),
                    _ => Err("Please provide a node".to_owned()),
                }
            }
            _ => Err("Invalid network: local, sepolia, mainnet or node,<url>".to_owned()),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// JSON config file, environment variables override it
    #[clap(
        short,
        long,
        global = true,
        parse(from_os_str),
        value_name = "FILE",
        default_value = "config.json"
    )]
    pub(crate) config: PathBuf,

    /// ethereum-compatible network
    #[clap(long, global = true)]
    pub(crate) network: Option<Network>,

    /// http request timeout, seconds
    #[clap(long, global = true)]
    pub(crate) timeout: Option<u64>,

    #[clap(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Grant the admin role to an address (owner only)
    AddAdmin {
        /// new admin address
        #[clap(long)]
        admin: String,
    },
    /// Fund the red packet contract
    Deposit {
        /// amount in wei, 0.001 ETH by default
        #[clap(long)]
        amount_wei: Option<String>,
    },
    /// Validate the roster and register participants in chunks
    Register {
        /// participant roster
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        csv: Option<PathBuf>,

        /// participants per transaction
        #[clap(long)]
        batch_size: Option<usize>,

        /// skip bad rows and failed chunks instead of aborting
        #[clap(long)]
        force: bool,

        /// accept contract wallets
        #[clap(long)]
        no_eoa_check: bool,
    },
    /// Record every roster wallet's balance back into the roster
    Balances {
        /// participant roster
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        csv: Option<PathBuf>,

        /// where to write the updated roster, the roster itself by default
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Show the live draw state
    Status,
    /// Request randomness from the VRF wrapper
    RequestDraw {
        /// abort when the quoted fee is above this, wei
        #[clap(long)]
        max_fee_wei: Option<String>,
    },
    /// Pay out once the random word is ready
    Distribute,
    /// Fill the random word by hand when the VRF callback never arrives
    EmergencyFulfill {
        /// defaults to the current unix time
        #[clap(long)]
        random_word: Option<String>,

        /// only warn when randomReady is still false afterwards
        #[clap(long)]
        tolerate_unready: bool,
    },
    /// Reconcile Allocation events into an SQL update script
    Export {
        #[clap(long)]
        from_block: Option<u64>,

        /// chain head by default
        #[clap(long)]
        to_block: Option<u64>,

        /// output file
        #[clap(long, parse(from_os_str), value_name = "FILE")]
        output: Option<PathBuf>,

        /// address or user-id
        #[clap(long)]
        key: Option<SqlKey>,
    },
    /// Print a config template
    ShowConfig,
}

impl Cli {
    pub(crate) fn parse_args() -> Self {
        Cli::parse()
    }

    /// Flags win over the environment, which wins over the file.
    pub(crate) fn apply(&self, config: &mut Config) {
        if let Some(network) = &self.network {
            network.apply(config);
        }
        if let Some(timeout) = self.timeout {
            config.chain.timeout = timeout;
        }
        match &self.command {
            Commands::Deposit { amount_wei: Some(v) } => config.draw.deposit_wei = v.clone(),
            Commands::Register {
                csv,
                batch_size,
                force,
                no_eoa_check,
            } => {
                if let Some(csv) = csv {
                    config.register.csv_path = csv.clone();
                }
                if let Some(size) = batch_size {
                    config.register.batch_size = *size;
                }
                if *force {
                    config.register.force_submit = true;
                }
                if *no_eoa_check {
                    config.register.eoa_check = false;
                }
            }
            Commands::Balances { csv: Some(csv), .. } => config.register.csv_path = csv.clone(),
            Commands::RequestDraw { max_fee_wei: Some(v) } => config.draw.max_vrf_fee_wei = Some(v.clone()),
            Commands::EmergencyFulfill {
                random_word: Some(v), ..
            } => config.draw.random_word = Some(v.clone()),
            Commands::Export {
                from_block,
                to_block,
                output,
                key,
            } => {
                if let Some(b) = from_block {
                    config.export.from_block = *b;
                }
                if let Some(b) = to_block {
                    config.export.to_block = Some(*b);
                }
                if let Some(path) = output {
                    config.export.sql_path = path.clone();
                }
                if let Some(key) = key {
                    config.export.key = *key;
                }
            }
            _ => {}
        }
    }
}

impl Commands {
    pub(crate) async fn execute<G: ChainGateway + ?Sized>(&self, gw: &G, config: &Config) -> Result<()> {
        match self {
            Commands::AddAdmin { admin } => match admin::add_admin(gw, admin).await? {
                AdminOutcome::AlreadyAdmin(who) => info!("{:?} is already an admin, nothing sent", who),
                AdminOutcome::Added { admin, verified, .. } => {
                    if verified {
                        info!("admin {:?} added", admin)
                    } else {
                        warn!("admin {:?} not visible yet, check the transaction", admin)
                    }
                }
            },
            Commands::Deposit { .. } => {
                let out = admin::deposit(gw, config.deposit_amount()?).await?;
                info!(
                    "deposited {} ETH, balance {} -> {} ETH",
                    format_ether(out.amount),
                    format_ether(out.balance_before),
                    format_ether(out.balance_after)
                );
            }
            Commands::Register { .. } => register(gw, config).await?,
            Commands::Balances { output, .. } => {
                let input = &config.register.csv_path;
                let output = output.as_ref().unwrap_or(input);
                let report = balances::update_balances_at(gw, input, output).await?;
                info!(
                    "balances checked rows={} updated={} failed={}",
                    report.total_rows,
                    report.updated,
                    report.failed.len()
                );
            }
            Commands::Status => {
                let status = draw::status(gw).await?;
                info!(
                    "state={} drawInProgress={} randomReady={} lastRandomWord={}",
                    status.state, status.draw_in_progress, status.random_ready, status.last_random_word
                );
                let pot = gw.balance(gw.contract_address()).await?;
                info!("contract balance {} ETH", format_ether(pot));
            }
            Commands::RequestDraw { .. } => {
                let out = draw::request_draw(gw, config.max_vrf_fee()?).await?;
                info!(
                    "draw requested, fee {} ETH, tx={:?}; the VRF callback may take a few minutes",
                    format_ether(out.price),
                    out.receipt.tx_hash
                );
            }
            Commands::Distribute => {
                let out = draw::distribute(gw).await?;
                info!("state={} tx={:?}", out.state, out.receipt.tx_hash);
            }
            Commands::EmergencyFulfill { tolerate_unready, .. } => {
                let policy = FailurePolicy::from_force_flag(*tolerate_unready);
                let out = draw::emergency_fulfill(gw, config.random_word()?, policy).await?;
                info!(
                    "emergency fulfill done, word={} ready={}",
                    out.last_random_word, out.random_ready
                );
            }
            Commands::Export { .. } => {
                let opts = &config.export;
                let rec = reconcile::reconcile(gw, opts.from_block, opts.to_block).await?;
                let sql_opts = SqlOptions {
                    table: opts.table.clone(),
                    status_marker: opts.status_marker.clone(),
                    key: opts.key,
                };
                let sql = reconcile::render_sql(&rec, &sql_opts, gw.contract_address(), Utc::now())?;
                reconcile::write_sql(&opts.sql_path, &sql)?;
                info!("{} update statements", rec.totals.len());
            }
            Commands::ShowConfig => Config::show(),
        }
        Ok(())
    }
}

async fn register<G: ChainGateway + ?Sized>(gw: &G, config: &Config) -> Result<()> {
    let opts = &config.register;
    let policy = RosterPolicy {
        eoa_check: opts.eoa_check,
        on_invalid: opts.policy(),
    };
    let file = roster::open_roster(&opts.csv_path)?;
    let (roster, report) = batch::register(gw, file, policy, opts.batch_size, opts.policy()).await?;
    for failure in &report.failures {
        warn!(
            "chunk {} (ids {}..={}) not registered: {}",
            failure.index + 1,
            failure.first_id,
            failure.last_id,
            failure.reason
        );
    }
    info!(
        "accepted={} rejected={} chunks={}/{} registered={}",
        roster.accepted.len(),
        roster.rejected_count(),
        report.succeeded_chunks,
        report.total_chunks,
        report.records_submitted
    );
    Ok(())
}
