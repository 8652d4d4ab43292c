use std::net::SocketAddr;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "sgrid")]
#[command(about = "Session grid queue - admission queue for browser session requests")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Address to serve the queue endpoints on
    #[arg(long, default_value = "127.0.0.1:5557", value_name = "ADDR")]
    pub bind: SocketAddr,

    /// Seconds between retry attempts for a front-inserted request
    #[arg(long, default_value_t = 5, value_name = "SECONDS")]
    pub retry_interval: u64,

    /// Seconds a request may wait in the queue before rejection
    #[arg(long, default_value_t = 300, value_name = "SECONDS")]
    pub session_request_timeout: u64,

    /// Shared secret required on retry and clear calls
    #[arg(long, value_name = "SECRET")]
    pub registration_secret: Option<String>,
}
