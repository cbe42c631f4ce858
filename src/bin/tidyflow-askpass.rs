//! Helper executable that git runs as GIT_ASKPASS / SSH_ASKPASS / credential helper.
//!
//! It forwards its arguments, TIDYFLOW_* variables and (for credential helper
//! calls) stdin to the host's trampoline listener and prints the answer.

use std::env;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::process::ExitCode;
use std::time::Duration;

use tidyflow_git::trampoline::protocol::{
    encode_request, FORWARDED_ENV_PREFIX, HOST_ENV, PORT_ENV,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(300);

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tidyflow-askpass: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> io::Result<()> {
    let port = env::var(PORT_ENV)
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} not set", PORT_ENV)))?;

    let args: Vec<String> = env::args().skip(1).collect();
    let forwarded: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(FORWARDED_ENV_PREFIX))
        .collect();

    // Only credential helper calls carry input on stdin
    let mut stdin = Vec::new();
    if args.first().map(String::as_str) == Some("credential") {
        io::stdin().read_to_end(&mut stdin)?;
    }

    let host = match env::var(HOST_ENV) {
        Ok(host) => host.parse::<IpAddr>().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", HOST_ENV, e))
        })?,
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    let addr = SocketAddr::new(host, port);
    let mut stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.write_all(&encode_request(&args, &forwarded, &stdin))?;
    stream.shutdown(Shutdown::Write)?;

    let mut answer = Vec::new();
    stream.read_to_end(&mut answer)?;

    let mut stdout = io::stdout().lock();
    stdout.write_all(&answer)?;
    stdout.flush()
}
