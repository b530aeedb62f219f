use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel as channel;
use tracing::{info, warn};
use xferacct::{Account, Config, Error, Progress, Stats};

use crate::cli::CopyArgs;

pub fn run_copy(args: CopyArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    let stats = Arc::new(Stats::new(config));

    let src = File::open(&args.src).with_context(|| format!("Opening {}", args.src.display()))?;
    let size = src.metadata().map(|m| m.len() as i64).unwrap_or(-1);
    let dst = File::create(&args.dst).with_context(|| format!("Creating {}", args.dst.display()))?;
    info!(src = %args.src.display(), dst = %args.dst.display(), size, "Starting copy");

    let account = Account::new(src, size, args.src.display().to_string(), &stats);
    if !args.no_buffer {
        account.enable_buffering();
    }

    install_interrupt(account.clone());

    // Stats reporter; stops when `done_tx` is dropped
    let (done_tx, done_rx) = channel::bounded::<()>(0);
    let reporter = (args.stats > 0).then(|| {
        let stats = Arc::clone(&stats);
        let ticker = channel::tick(Duration::from_secs(args.stats));
        thread::spawn(move || loop {
            channel::select! {
                recv(ticker) -> _ => info!("\n{}", stats.render()),
                recv(done_rx) -> _ => break,
            }
        })
    });

    let copied = copy_to(&account, dst);
    let closed = account.close();
    drop(done_tx);
    if let Some(handle) = reporter {
        let _ = handle.join();
    }

    let copied = copied.with_context(|| format!("Copying {}", args.src.display()))?;
    closed.with_context(|| format!("Closing {}", args.src.display()))?;
    let (average, _) = account.speed();
    info!(bytes = copied, elapsed = ?stats.elapsed(), average_bps = average as u64, "Copy finished");
    Ok(())
}

/// Close `account` on Ctrl-C. Only one handler can exist per process, so a
/// second install is logged and reported as `false`.
fn install_interrupt(account: Account) -> bool {
    let installed = ctrlc::set_handler(move || {
        if let Err(e) = account.close() {
            warn!(?e, "Error closing source on interrupt");
        }
    });
    match installed {
        Ok(()) => true,
        Err(e) => {
            warn!(?e, "Failed to install interrupt handler; Ctrl-C will not close the source");
            false
        }
    }
}

fn copy_to(account: &Account, dst: File) -> Result<u64> {
    let mut reader = account;
    let mut writer = BufWriter::new(dst);
    let copied = match io::copy(&mut reader, &mut writer) {
        Ok(n) => n,
        Err(e) if Error::is_stream_closed(&e) => bail!(Error::StreamClosed),
        Err(e) => return Err(e.into()),
    };
    writer.flush()?;
    Ok(copied)
}
