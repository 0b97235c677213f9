// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![deny(clippy::all)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::l2tpd::{
    l2tp::server::{
        L2tpServer,
        ServerOptions,
    },
    runtime::logging,
    Config,
    Registry,
};
use ::std::{
    net::Ipv4Addr,
    str::FromStr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug)]
pub struct ProgramArguments {
    config_path: Option<String>,
    udp_port: Option<u16>,
    bind_addr: Option<Ipv4Addr>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl ProgramArguments {
    pub fn new() -> Result<Self> {
        let matches: ArgMatches = Command::new("l2tpd")
            .about("L2TP version 2 control-plane daemon")
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the YAML configuration file"),
            )
            .arg(
                Arg::new("udp-port")
                    .long("udp-port")
                    .value_parser(clap::value_parser!(u16))
                    .required(false)
                    .value_name("PORT")
                    .help("Overrides the UDP port (0 looks it up in /etc/services)"),
            )
            .arg(
                Arg::new("bind")
                    .long("bind")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("ADDRESS")
                    .help("Overrides the local IPv4 address to listen on"),
            )
            .get_matches();

        let bind_addr: Option<Ipv4Addr> = match matches.get_one::<String>("bind") {
            Some(addr) => Some(Ipv4Addr::from_str(addr)?),
            None => None,
        };
        Ok(Self {
            config_path: matches.get_one::<String>("config").cloned(),
            udp_port: matches.get_one::<u16>("udp-port").copied(),
            bind_addr,
        })
    }
}

//======================================================================================================================
// main()
//======================================================================================================================

fn main() -> Result<()> {
    logging::initialize();
    let args: ProgramArguments = ProgramArguments::new()?;

    let config: Config = match args.config_path.as_deref() {
        Some(path) => Config::new(path)?,
        None => Config::empty(),
    };
    let mut options: ServerOptions = ServerOptions {
        bind_addr: config.bind_addr()?,
        udp_port: config.udp_port()?,
        use_udp_checksums: config.use_udp_checksums()?,
    };
    if let Some(port) = args.udp_port {
        options.udp_port = port;
    }
    if let Some(addr) = args.bind_addr {
        options.bind_addr = addr;
    }

    let registry: Registry = Registry::new(config.registry_config()?, config.profiles()?)?;
    let mut server: L2tpServer = L2tpServer::new(options.resolved()?, registry)?;
    server.stop_handle().register_signals()?;
    server.run()?;
    Ok(())
}
