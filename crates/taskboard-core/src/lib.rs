pub mod app;
pub mod binding;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod filter;
pub mod notifications;
pub mod render;
pub mod runtime;
pub mod storage;
pub mod task;
pub mod tasks;
pub mod ui;

use std::ffi::OsString;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::app::{
  App,
  Host
};
use crate::runtime::{
  Clock,
  ManualScheduler,
  SystemClock
};
use crate::storage::{
  FileBackend,
  LocalStore
};
use crate::ui::HeadlessDisplay;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting taskboard CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let backend = FileBackend::open(
    &data_dir,
    cfg.storage_quota()?
  )
  .with_context(|| {
    format!(
      "failed to open storage at {}",
      data_dir.display()
    )
  })?;
  let storage = Rc::new(
    LocalStore::new(Rc::new(backend))
  );

  // One-shot process: notifications are
  // printed before exit, never expired.
  let clock: Rc<dyn Clock> =
    Rc::new(SystemClock);
  let scheduler = Rc::new(
    ManualScheduler::new(clock.clone())
  );
  let display = HeadlessDisplay::new(
    cfg
      .get_bool("display.dark")
      .unwrap_or(false)
  );

  let mut app = App::new(Host {
    storage,
    clock,
    scheduler,
    display,
    timezone: cfg.timezone()
  });
  app.start();

  let renderer =
    render::Renderer::new(&cfg)?;
  let result = commands::dispatch(
    &app,
    &cfg,
    &renderer,
    cli.command
  );

  renderer.print_notifications(
    &app.notifications.all()
  )?;
  app.teardown();

  result?;
  info!("done");
  Ok(())
}
