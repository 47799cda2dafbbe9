use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use log::info;
use tether::{
    AcquireMode, ConnectionConfig, ConnectionPool, Encoding, PoolConfig, Value,
    cli::{parse_param, split_endpoint},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address as host:port
    address: String,
    /// Remote method to call
    method: String,
    /// Call parameters (nil, true/false, numbers, anything else is a string)
    #[arg(allow_hyphen_values = true)]
    params: Vec<String>,
    /// Number of calls to make
    #[arg(long, default_value_t = 1)]
    repeat: usize,
    /// Number of threads issuing calls
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
    /// Maximum number of pooled connections
    #[arg(long, default_value_t = 10)]
    pool_size: usize,
    /// Open overflow connections instead of waiting when the pool is saturated
    #[arg(long)]
    expanding: bool,
    /// Open all pooled connections before the first call
    #[arg(long)]
    eager: bool,
    /// Connect attempts per connection
    #[arg(long, default_value_t = 3)]
    retries: u32,
    /// Pause between connect attempts
    #[arg(long, default_value_t = 100)]
    retry_delay_ms: u64,
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
    /// Read/write deadline per call
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Use big-endian fixed-width integers on the wire
    #[arg(long)]
    fixed_encoding: bool,
}

impl Cli {
    fn pool_config(&self) -> Result<PoolConfig, String> {
        let (host, port) = split_endpoint(&self.address)?;

        let mut connection = ConnectionConfig::new(host, port);
        if self.fixed_encoding {
            connection = connection.with_encoding(Encoding::Fixed);
        }
        if let Some(ms) = self.connect_timeout_ms {
            connection = connection.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.timeout_ms {
            connection = connection.with_io_timeout(Duration::from_millis(ms));
        }

        let mode = if self.expanding {
            AcquireMode::Expanding
        } else {
            AcquireMode::Blocking
        };
        Ok(PoolConfig::new(connection)
            .with_max_size(self.pool_size)
            .with_lazy(!self.eager)
            .with_mode(mode)
            .with_retries(self.retries, Duration::from_millis(self.retry_delay_ms)))
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDERR
    env_logger::init();

    let cli = Cli::parse();
    let pool = ConnectionPool::new(cli.pool_config()?)?;
    let params: Vec<Value> = cli.params.iter().map(|p| parse_param(p)).collect();

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        let pool = pool.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
            pool.close();
        })?;
    }

    let issued = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    thread::scope(|s| {
        for _ in 0..cli.concurrency.max(1) {
            s.spawn(|| {
                while !stop.load(Ordering::SeqCst)
                    && issued.fetch_add(1, Ordering::SeqCst) < cli.repeat
                {
                    match pool.call(&cli.method, params.clone()) {
                        Ok(result) => println!("{result}"),
                        Err(e) => {
                            eprintln!("error: {e}");
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
        }
    });

    info!("finished, pool status: {:?}", pool.status());
    pool.close();

    let failed = failed.into_inner();
    if failed > 0 {
        return Err(format!("{failed} of {} calls failed", cli.repeat).into());
    }
    Ok(())
}
