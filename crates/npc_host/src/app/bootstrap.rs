use std::cell::RefCell;
use std::rc::Rc;

use npc_engine::{
    load_records, load_settings, resolve_data_paths, CommandFacade, DataPaths, DebouncedWriter,
    FileSink, FlushMode, Reconciler, StartupError, Trigger,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::sim::{build_providers, SharedSim, SimState};
use super::session::HostSession;

pub(crate) struct AppWiring {
    pub(crate) session: HostSession,
    pub(crate) paths: DataPaths,
    pub(crate) ticks_per_second: u32,
}

pub(crate) fn build_app() -> Result<AppWiring, StartupError> {
    let paths = resolve_data_paths()?;
    let settings = load_settings(&paths.settings_path)?;
    init_tracing(settings.debug);
    info!(
        data_dir = %paths.data_dir.display(),
        version = env!("CARGO_PKG_VERSION"),
        "=== Island NPC host startup ==="
    );
    info!(
        provider = %settings.npc.provider,
        labels = settings.label.enabled,
        debounce_ticks = settings.timing.save_debounce_ticks,
        "settings_loaded"
    );

    let store = load_records(&paths.records_path)?;
    let sim: SharedSim = Rc::new(RefCell::new(SimState::default()));
    let providers = build_providers(&sim, &settings);
    let writer = DebouncedWriter::new(
        paths.records_path.clone(),
        settings.timing.save_debounce_ticks,
        Box::new(FileSink),
        FlushMode::Worker,
    );
    let ticks_per_second = settings.timing.ticks_per_second.max(1);

    let mut engine = Reconciler::new(settings, store, writer, providers);
    engine.submit(Trigger::ReconcileAll);
    let facade = CommandFacade::new(Some(paths.settings_path.clone()));

    Ok(AppWiring {
        session: HostSession::new(engine, facade, sim),
        paths,
        ticks_per_second,
    })
}

/// Installs the subscriber. Safe to call twice; the second call is a no-op.
pub(crate) fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .try_init();
}
