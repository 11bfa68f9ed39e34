use clap::{Parser, Subcommand};
use hostnet::{
    Event, NetworkConfiguration, NetworkConfigurationManager, ProxySettings, ProxyType,
    get_config_path, load_config_from,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hostnet", version)]
#[command(about = "Inspect and change host network, VPN and proxy settings", long_about = None)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Password answered to the elevation prompt
    #[arg(long, env = "HOSTNET_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configurable adapters
    Interfaces,
    /// Show non-loopback addresses per interface
    Addresses,
    /// Show the stored configuration of an adapter
    Show { adapter: String },
    /// Write and verify an adapter configuration
    Set {
        adapter: String,
        /// Use DHCP instead of a static address
        #[arg(long, conflicts_with_all = ["address", "netmask"])]
        dhcp: bool,
        #[arg(long, required_unless_present = "dhcp")]
        address: Option<String>,
        #[arg(long, required_unless_present = "dhcp")]
        netmask: Option<String>,
        #[arg(long, default_value = "")]
        gateway: String,
        #[arg(long, default_value = "")]
        dns: String,
        #[arg(long, default_value = "")]
        alternate_dns: String,
    },
    /// Check that the password is accepted for elevation
    CheckPassword,
    #[command(subcommand)]
    Vpn(VpnCommands),
    #[command(subcommand)]
    Proxy(ProxyCommands),
}

#[derive(Subcommand)]
enum VpnCommands {
    On,
    Off,
    /// Whether the VPN service tooling is available
    Probe,
    /// Print the VPN client configuration
    ConfigShow,
    /// Replace the VPN client configuration with the contents of a file
    ConfigSet { file: PathBuf },
}

#[derive(Subcommand)]
enum ProxyCommands {
    Show,
    Set {
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        /// HttpProxy, HttpCachingProxy, Socks5Proxy or FtpCachingProxy
        #[arg(long, default_value = "HttpProxy")]
        proxy_type: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value = "")]
        user_password: String,
        /// Hosts that bypass the proxy, e.g. `*.lan`
        #[arg(long = "exclude")]
        excludes: Vec<String>,
        #[arg(long)]
        disabled: bool,
    },
    /// Print how a request to `host` would be routed
    Resolve { host: String },
}

fn wait_for(events: &mut UnboundedReceiver<Event>) -> ExitCode {
    match events.blocking_recv() {
        Some(Event::Error(e)) => {
            eprintln!("Error {}/{}: {}", e.module_code, e.error_code, e.message);
            ExitCode::FAILURE
        }
        Some(event) => {
            print_event(&event);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("Network worker stopped unexpectedly");
            ExitCode::FAILURE
        }
    }
}

fn print_event(event: &Event) {
    match event {
        Event::InterfacesFetched(names) => names.iter().for_each(|n| println!("{}", n)),
        Event::ConfigurationFetched(config) => {
            println!("adapter:   {}", config.description);
            if let Some(index) = config.index {
                println!("index:     {}", index);
            }
            println!("mode:      {}", config.mode().as_str());
            if !config.dhcp_enabled {
                println!("address:   {}", config.ipv4_address);
                println!("netmask:   {}", config.subnet_mask);
                println!("gateway:   {}", config.gateway);
                println!("dns:       {}", config.dns_servers().join(" "));
            }
        }
        Event::PasswordChecked(ok) => println!("{}", if *ok { "accepted" } else { "rejected" }),
        Event::ProxyFetched(settings, excludes) => {
            println!("enabled:   {}", settings.enabled);
            println!("proxy:     {}", settings.url());
            println!("type:      {}", settings.proxy_type.as_str());
            println!("excludes:  {}", excludes.join(" "));
        }
        Event::VpnConfigurationFetched(contents) => print!("{}", contents),
        Event::ConfigurationWritten
        | Event::ProxyWritten
        | Event::VpnConfigurationWritten
        | Event::VpnTurnedOn
        | Event::VpnTurnedOff => println!("ok"),
        Event::Error(e) => eprintln!("{}", e.message),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let settings_path = match cli.config.clone().map(Ok).unwrap_or_else(get_config_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Settings location unavailable: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = match load_config_from(&settings_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {}", e);
            Default::default()
        }
    };

    let (manager, mut events) = match NetworkConfigurationManager::start(&config, settings_path) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if !manager.supported() {
        tracing::warn!("Network configuration is not supported on this platform");
    }

    let password = cli.password;
    let code = match cli.command {
        Commands::Interfaces => {
            manager.fetch_network_interfaces();
            wait_for(&mut events)
        }
        Commands::Addresses => match manager.addresses() {
            Ok(map) => {
                for (name, addresses) in map {
                    println!("{}: {}", name, addresses.join(" "));
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Show { adapter } => {
            manager.fetch_network_configuration(adapter);
            wait_for(&mut events)
        }
        Commands::Set {
            adapter,
            dhcp,
            address,
            netmask,
            gateway,
            dns,
            alternate_dns,
        } => {
            let desired = if dhcp {
                NetworkConfiguration::dhcp(adapter)
            } else {
                NetworkConfiguration::static_ip(
                    adapter,
                    address.unwrap_or_default(),
                    netmask.unwrap_or_default(),
                )
                .with_gateway(gateway)
                .with_dns(dns, alternate_dns)
            };
            manager.write_network_configuration(desired, password);
            wait_for(&mut events)
        }
        Commands::CheckPassword => {
            manager.check_password(password);
            wait_for(&mut events)
        }
        Commands::Vpn(VpnCommands::On) => {
            manager.turn_vpn_on(password);
            wait_for(&mut events)
        }
        Commands::Vpn(VpnCommands::Off) => {
            manager.turn_vpn_off(password);
            wait_for(&mut events)
        }
        Commands::Vpn(VpnCommands::Probe) => {
            let supported = manager.vpn_control_supported();
            println!("{}", if supported { "available" } else { "unavailable" });
            ExitCode::SUCCESS
        }
        Commands::Vpn(VpnCommands::ConfigShow) => {
            manager.fetch_vpn_configuration();
            wait_for(&mut events)
        }
        Commands::Vpn(VpnCommands::ConfigSet { file }) => match std::fs::read_to_string(&file) {
            Ok(contents) => {
                manager.write_vpn_configuration(contents, password);
                wait_for(&mut events)
            }
            Err(e) => {
                eprintln!("{} can't be read: {}", file.display(), e);
                ExitCode::FAILURE
            }
        },
        Commands::Proxy(ProxyCommands::Show) => {
            manager.fetch_proxy();
            wait_for(&mut events)
        }
        Commands::Proxy(ProxyCommands::Set {
            host,
            port,
            proxy_type,
            username,
            user_password,
            excludes,
            disabled,
        }) => {
            let settings = ProxySettings {
                enabled: !disabled,
                host,
                port,
                proxy_type: ProxyType::from_setting(&proxy_type),
                user_name: username,
                password: user_password,
            };
            manager.write_proxy(settings, excludes);
            wait_for(&mut events)
        }
        Commands::Proxy(ProxyCommands::Resolve { host }) => {
            println!("{:?}", manager.proxy_context().select(&host));
            ExitCode::SUCCESS
        }
    };

    manager.shutdown();
    code
}
