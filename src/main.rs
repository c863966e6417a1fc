//! Homewrecker standalone daemon
//!
//! Runs the reconciliation engine against in-memory collaborators, seeding a
//! simulated enclosure of drives. Useful for demos and for watching the
//! engine converge; production embeds the library and wires real services.

use anyhow::Result;
use clap::Parser;
use homewrecker::identity::FileIdentityStore;
use homewrecker::peer::ControllerRole;
use homewrecker::sim::SimCluster;
use homewrecker::topology::types::{
    BlockGeometry, DriveClass, DriveLocation, LinkSpeed, PhysicalDriveId, PhysicalDriveInfo,
};
use homewrecker::{Reconciler, ReconcilerConfig, SerialNumber, SystemDescriptor};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "homewrecker", version, about = "Drive reconciliation engine (standalone)")]
struct Args {
    /// Number of simulated user drives to seed
    #[arg(long, env = "HOMEWRECKER_DRIVES", default_value_t = 12)]
    drives: u32,

    /// Number of reserved system slots
    #[arg(long, env = "HOMEWRECKER_SYSTEM_SLOTS", default_value_t = 4)]
    system_slots: u32,

    /// World-wide-name seed of the simulated array
    #[arg(long, env = "HOMEWRECKER_WWN_SEED", default_value_t = 0xC0FFEE)]
    wwn_seed: u64,

    /// Directory for file-backed identity stamps; in-memory when omitted
    #[arg(long, env = "HOMEWRECKER_IDENTITY_DIR")]
    identity_dir: Option<std::path::PathBuf>,

    /// Start as the passive controller
    #[arg(long, env = "HOMEWRECKER_PASSIVE")]
    passive: bool,

    /// Log level filter
    #[arg(long, env = "HOMEWRECKER_LOG", default_value = "info")]
    log: String,

    /// Emit logs as JSON
    #[arg(long, env = "HOMEWRECKER_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn seed_drives(cluster: &SimCluster, args: &Args) {
    let mut id = 0u32;
    let mut add = |location: DriveLocation, serial: String, class: DriveClass| {
        cluster.topology.add_drive(PhysicalDriveInfo {
            id: PhysicalDriveId(id),
            location,
            serial: SerialNumber::new(serial),
            capacity: 0x2000_0000,
            block_geometry: BlockGeometry::Native512,
            drive_class: class,
            link_speed: LinkSpeed::Speed12G,
            maintenance_mode: false,
        });
        id += 1;
    };

    for slot in 0..args.system_slots {
        add(
            DriveLocation::new(0, 0, slot),
            format!("SIM_SYS_{slot}"),
            DriveClass::Flash,
        );
    }
    for n in 0..args.drives {
        let location = DriveLocation::new(0, 0, args.system_slots + n);
        add(location, format!("SIM_USR_{n}"), DriveClass::Sas10k);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    info!(
        version = homewrecker::VERSION,
        drives = args.drives,
        passive = args.passive,
        "starting"
    );

    let role = if args.passive {
        ControllerRole::Passive
    } else {
        ControllerRole::Active
    };
    let cluster = SimCluster::new(role);
    seed_drives(&cluster, &args);

    let config = ReconcilerConfig {
        system_slot_count: args.system_slots,
        ..ReconcilerConfig::default()
    };
    let descriptor = SystemDescriptor::new(
        args.wwn_seed,
        (0..args.system_slots)
            .map(|slot| SerialNumber::new(format!("SIM_SYS_{slot}")))
            .collect(),
    );

    let mut ctx = cluster.context(config, descriptor);
    if let Some(dir) = &args.identity_dir {
        ctx.identity = Arc::new(FileIdentityStore::new(dir));
    }

    let ingest_capacity = ctx.config.ingest_channel_capacity;
    let engine = Reconciler::new(ctx);
    let worker = engine.start();

    // hot-plug notifications would be pushed down this channel
    let (notify_tx, notify_rx) = tokio::sync::mpsc::channel(ingest_capacity);
    let ingest = tokio::spawn(homewrecker::reconciler::ingest::run_ingest(
        Arc::clone(&engine),
        notify_rx,
    ));
    engine.rescan().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    drop(notify_tx);
    ingest.await?;
    engine.stop();
    worker.await?;

    let (discover, connect) = engine.queue_depths();
    info!(discover, connect, "final queue depths");
    Ok(())
}
