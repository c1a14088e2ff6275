mod commands;

use commands::{Cli, Commands};
use log::info;
use redpacket::{config::Config, BlockClient};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse_args();
    if let Commands::ShowConfig = cli.command {
        Config::show();
        return Ok(());
    }

    let mut config = Config::load(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;

    let client = BlockClient::setup(&config, cli.timeout)?;
    client.check_chain()?;
    let red_packet = client.red_packet()?;
    info!("red packet={:?} signer={:?}", config.red_packet_address()?, client.root_addr);

    client.run(cli.command.execute(&red_packet, &config))?;
    Ok(())
}
