use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::str::FromStr;
use std::time::Duration;

use tftpd::server::{privilege, Config, Listener};

use clap::{crate_version, App, Arg};
use log::error;

const EXIT_NORMAL: i32 = 0;
const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_ROOTDIR_ERROR: i32 = 2;
const EXIT_PRIVILEGE_ERROR: i32 = 3;

fn main() {
    env_logger::init();

    let arg_addr = "Address";
    let arg_dir = "Directory";
    let arg_timeout = "Timeout";
    let arg_readonly = "Readonly";
    let arg_user = "User";

    let matches = App::new("TFTP Server")
        .about("A server implementation of the TFTP Protocol (IETF RFC 1350)")
        .version(crate_version!())
        .arg(
            Arg::with_name(arg_addr)
                .short("a")
                .long("address")
                .help("specifies an address[:port] to listen on")
                .takes_value(true)
                .value_name("IP[:PORT]"),
        )
        .arg(
            Arg::with_name(arg_dir)
                .short("d")
                .long("directory")
                .help("specifies the directory to serve (current by default)")
                .takes_value(true)
                .value_name("DIRECTORY"),
        )
        .arg(
            Arg::with_name(arg_timeout)
                .short("t")
                .long("timeout")
                .help("the (non-zero) number of seconds before an idle transfer is terminated")
                .takes_value(true)
                .value_name("SECONDS"),
        )
        .arg(
            Arg::with_name(arg_readonly)
                .short("r")
                .long("readonly")
                .help("rejects all write requests"),
        )
        .arg(
            Arg::with_name(arg_user)
                .short("u")
                .long("user")
                .help("unix user to drop privileges to after binding")
                .takes_value(true)
                .value_name("NAME"),
        )
        .get_matches();

    let (host, port) = match matches.value_of(arg_addr) {
        None => (String::new(), 69),
        Some(s) => {
            if let Ok(sk) = SocketAddr::from_str(s) {
                (sk.ip().to_string(), sk.port())
            } else if let Ok(ip) = IpAddr::from_str(s) {
                (ip.to_string(), 69)
            } else {
                error!("error parsing argument \"{}\" as an address", s);
                exit(EXIT_CONFIG_ERROR);
            }
        }
    };

    let timeout = match matches.value_of(arg_timeout) {
        None => 3,
        Some(s) => match u64::from_str(s) {
            Ok(0) => {
                error!("timeout may not be 0 seconds");
                exit(EXIT_CONFIG_ERROR);
            }
            Ok(n) => n,
            Err(_) => {
                error!("error parsing \"{}\" as a timeout", s);
                exit(EXIT_CONFIG_ERROR);
            }
        },
    };

    let tftp_root = match matches.value_of(arg_dir) {
        None => PathBuf::from("."),
        Some(dir) => Path::new(dir).to_owned(),
    };
    if !tftp_root.is_dir() {
        error!("specified directory \"{}\" does not exist", tftp_root.display());
        exit(EXIT_ROOTDIR_ERROR);
    }

    let user = matches.value_of(arg_user).map(str::to_owned);

    let mut schedule = tftpd::server::default_timeout_schedule();
    schedule.push(Duration::from_secs(timeout));

    let cfg = Config {
        host,
        port,
        tftp_root,
        writable: !matches.is_present(arg_readonly),
        bufsize: 516,
        timeout_schedule: schedule,
        user,
    };

    let listener = match Listener::bind(&cfg) {
        Ok(l) => l,
        Err(e) => {
            error!("failed to start server: {}", e);
            exit(EXIT_ROOTDIR_ERROR);
        }
    };

    if let Err(e) = privilege::drop_to_user(cfg.user.as_deref()) {
        error!("failed to drop privileges: {}", e);
        exit(EXIT_PRIVILEGE_ERROR);
    }

    match listener.run() {
        Ok(()) => exit(EXIT_NORMAL),
        Err(e) => {
            error!("server terminated: {}", e);
            exit(EXIT_CONFIG_ERROR);
        }
    }
}
