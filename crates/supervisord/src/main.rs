//! `dobby-supervisord`'s process entrypoint: parses CLI config, bootstraps
//! the `Engine`, blocks waiting for a termination signal, then shuts the
//! reaper thread down cleanly.
//!
//! No D-Bus/IPC transport or readline shell lives here (SPEC_FULL.md §1,
//! "Out of scope" — those are external collaborators this core's contract
//! doesn't include); this binary exists to exercise the lifecycle engine
//! standalone and as the process the out-of-scope IPC layer would embed.

use nix::sys::signal::{SigSet, Signal};

use supervisord::{Config, Engine, PlatformInfo};

fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", config.log_level().to_string());
    }
    common::init_logging();

    let platform = PlatformInfo::from_env();
    log::info!("starting dobby-supervisord, platform={platform:?}");

    // Block SIGINT/SIGTERM here, before `Engine::bootstrap` spawns the
    // reaper thread, so every thread in the process inherits the same
    // blocked mask and only this thread's `wait()` ever observes them —
    // the same masked-and-sigwait-drained model §5 uses for SIGCHLD,
    // reused for the process's own shutdown trigger instead of pulling in
    // a signal-handling crate the teacher's stack doesn't carry.
    let mut shutdown_mask = SigSet::empty();
    shutdown_mask.add(Signal::SIGINT);
    shutdown_mask.add(Signal::SIGTERM);
    shutdown_mask.thread_block()?;

    let engine = Engine::bootstrap(&config)?;
    log::info!(
        "dobby-supervisord ready, {} container(s) recovered at startup",
        engine.manager.container_count()
    );

    loop {
        match shutdown_mask.wait() {
            Ok(Signal::SIGINT) | Ok(Signal::SIGTERM) => break,
            Ok(other) => {
                log::warn!("main thread woke on unexpected signal {other:?}");
            }
            Err(e) => {
                log::error!("sigwait failed: {e}");
                break;
            }
        }
    }

    log::info!("shutdown signal received, stopping reaper thread");
    engine.shutdown();
    Ok(())
}
