use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use dotenvy::dotenv;

use simlab::{
    init_tracing, log_error, log_info, log_warn, HistoryStore, HttpBackend, KvStore,
    Orchestrator, OrchestratorOptions, ResultCache, RunConfiguration, RunOutcome, SimlabSettings,
    SqliteStore,
};

fn usage() -> ! {
    log_error("Usage:\n  simlab_harness settings\n  simlab_harness run <config_json> [db_path]\n  simlab_harness history-export [db_path]\n  simlab_harness history-import <file> [db_path]\n  simlab_harness history-stats [db_path]\n  simlab_harness history-clear [db_path]\n  simlab_harness cache-stats [db_path]\n  simlab_harness cache-clear [db_path]");
    std::process::exit(2)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    if let Err(err) = dotenv() {
        log_warn(format!("no .env loaded: {err}"));
    }
    let settings = SimlabSettings::from_env();

    let mut args = env::args().skip(1);
    let Some(cmd) = args.next() else { usage() };
    let code = match cmd.as_str() {
        "settings" => {
            println!("{}", settings.summary());
            Ok(0)
        }
        "run" => {
            let config_json = args.next().unwrap_or_else(|| usage());
            let db = db_arg(args.next(), &settings);
            cmd_run(&settings, &db, &config_json).await
        }
        "history-export" => {
            let db = db_arg(args.next(), &settings);
            cmd_history_export(&settings, &db)
        }
        "history-import" => {
            let file = PathBuf::from(args.next().unwrap_or_else(|| usage()));
            let db = db_arg(args.next(), &settings);
            cmd_history_import(&settings, &db, &file)
        }
        "history-stats" => {
            let db = db_arg(args.next(), &settings);
            cmd_history_stats(&settings, &db)
        }
        "history-clear" => {
            let db = db_arg(args.next(), &settings);
            cmd_history_clear(&settings, &db)
        }
        "cache-stats" => {
            let db = db_arg(args.next(), &settings);
            cmd_cache_stats(&settings, &db)
        }
        "cache-clear" => {
            let db = db_arg(args.next(), &settings);
            cmd_cache_clear(&settings, &db)
        }
        _ => usage(),
    };
    match code {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log_error(format!("error: {err:?}"));
            std::process::exit(1);
        }
    }
}

fn db_arg(arg: Option<String>, settings: &SimlabSettings) -> PathBuf {
    arg.map(PathBuf::from).unwrap_or_else(|| settings.db_path())
}

fn open_store(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<Arc<dyn KvStore>> {
    let store = SqliteStore::open(db, Some(settings.storage_quota_bytes))?;
    Ok(Arc::new(store))
}

fn history(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<HistoryStore> {
    Ok(HistoryStore::with_max_entries(
        open_store(settings, db)?,
        settings.history_max_entries,
    ))
}

fn cache(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<ResultCache> {
    Ok(ResultCache::with_limits(
        open_store(settings, db)?,
        settings.cache_ttl,
        settings.cache_max_entries,
    ))
}

async fn cmd_run(settings: &SimlabSettings, db: &PathBuf, config_json: &str) -> anyhow::Result<i32> {
    let config: RunConfiguration =
        serde_json::from_str(config_json).context("parse run configuration JSON")?;
    let backend = HttpBackend::from_settings(settings)?;
    let orchestrator = Orchestrator::with_options(
        Arc::new(backend),
        open_store(settings, db)?,
        OrchestratorOptions::from(settings),
    );

    let outcome = orchestrator.start_run(config).await;
    match outcome {
        RunOutcome::Completed { from_cache, history_id } => {
            log_info(format!(
                "run completed (cached={from_cache}, history={})",
                history_id.as_deref().unwrap_or("-")
            ));
            let results = orchestrator
                .current_results()
                .context("completed run published no results")?;
            println!("{}", serde_json::to_string_pretty(&results)?);
            Ok(0)
        }
        RunOutcome::Rejected(errors) => {
            log_error(format!("configuration rejected: {errors}"));
            Ok(2)
        }
        RunOutcome::Busy => bail!("another run is in flight"),
        RunOutcome::Cancelled => {
            log_warn("run cancelled");
            Ok(3)
        }
        RunOutcome::Failed(err) => Err(anyhow::Error::new(err).context("simulation run failed")),
    }
}

fn cmd_history_export(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<i32> {
    let json = history(settings, db)?.export_json()?;
    println!("{json}");
    Ok(0)
}

fn cmd_history_import(settings: &SimlabSettings, db: &PathBuf, file: &PathBuf) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("read {:?}", file))?;
    let imported = history(settings, db)?.import_json(&raw)?;
    println!("{imported}");
    Ok(0)
}

fn cmd_history_stats(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<i32> {
    let stats = history(settings, db)?.stats();
    println!("{}", serde_json::to_string(&stats)?);
    Ok(0)
}

fn cmd_history_clear(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<i32> {
    history(settings, db)?.clear()?;
    log_info("history cleared");
    Ok(0)
}

fn cmd_cache_stats(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<i32> {
    let stats = cache(settings, db)?.stats();
    println!("{}", serde_json::to_string(&stats)?);
    Ok(0)
}

fn cmd_cache_clear(settings: &SimlabSettings, db: &PathBuf) -> anyhow::Result<i32> {
    let removed = cache(settings, db)?.clear_all();
    println!("{removed}");
    Ok(0)
}
