//! PFT 서버/클라이언트
//!
//! 피어 주소 없이 실행하면 서버 (연결 대기 후 파일 송신), 피어 주소를 주면
//! 클라이언트 (서버에 연결해 파일 수신).
//!
//! 사용법:
//!   pft --file data.bin                # 서버, 30000 포트에서 대기
//!   pft 192.168.0.10 --output ./recv   # 클라이언트, 192.168.0.10:30000 에서 수신
//!
//! 예시:
//!   # 순서 번호 없는 원시 청크 모드, 512 바이트 청크
//!   pft -f data.bin --unsequenced --chunk-size 512 --once

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pft::{Config, Endpoint, Framing, TransferLoop, UdpTransport, CLIENT_PORT, SERVER_PORT};

/// PFT - paced, CRC-verified file transfer over UDP
#[derive(Parser, Debug)]
#[command(name = "pft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server address to receive from (runs as server when omitted)
    #[arg(value_parser = parse_peer)]
    peer: Option<SocketAddr>,

    /// File to send (server)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Output directory (client)
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Local port (default 30000 for server, 30001 for client)
    #[arg(long)]
    port: Option<u16>,

    /// Send raw chunks without sequence numbers or acks
    #[arg(long)]
    unsequenced: bool,

    /// Chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Preset for lossy, high latency links
    #[arg(long)]
    unstable: bool,

    /// Exit after one transfer (server)
    #[arg(long)]
    once: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// `IP` 또는 `IP:PORT`, 포트 생략 시 서버 기본 포트
fn parse_peer(value: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    value
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, SERVER_PORT))
        .map_err(|e| format!("유효한 주소 필요: {e}"))
}

fn build_config(cli: &Cli) -> Config {
    let mut config = if cli.unstable {
        Config::unstable_network()
    } else {
        Config::default()
    };

    if cli.unsequenced {
        config.framing = Framing::Unsequenced;
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = chunk_size;
    }
    config.exit_after_transfer = cli.once;
    config
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = build_config(&cli);

    let (endpoint, port) = match (cli.peer, &cli.file) {
        (Some(peer), _) => (
            Endpoint::Client {
                peer,
                output_dir: cli.output.clone(),
            },
            cli.port.unwrap_or(CLIENT_PORT),
        ),
        (None, Some(file)) => (
            Endpoint::Server {
                source: file.clone(),
            },
            cli.port.unwrap_or(SERVER_PORT),
        ),
        (None, None) => {
            error!("server mode requires --file");
            return ExitCode::FAILURE;
        }
    };

    let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let transport =
        match UdpTransport::bind(local_addr, config.protocol_id, config.connection_timeout).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("could not start socket: {}", e);
                return ExitCode::FAILURE;
            }
        };

    let mut transfer_loop = match TransferLoop::new(transport, endpoint, config) {
        Ok(transfer_loop) => transfer_loop,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = transfer_loop.run().await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match transfer_loop.reports().last() {
        Some(report) if !report.is_complete() => {
            error!(
                "transfer of {} failed: {}",
                report.filename,
                report.error.as_deref().unwrap_or("unknown")
            );
            ExitCode::FAILURE
        }
        Some(report) => {
            info!(
                "{} bytes in {:.2}s ({:.2} Mbps)",
                report.bytes,
                report.elapsed.as_secs_f64(),
                report.throughput_mbps()
            );
            ExitCode::SUCCESS
        }
        None => ExitCode::SUCCESS,
    }
}
