use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use multipad_core::{
    format_size, Document, ErrorReporter, EventBus, FileAccess, FileSizeClass, ProcessMemoryProbe,
    ResourceGuard, SessionData, StdFileSystem,
};
use multipad_session::{
    AutosaveOutcome, EditorContext, LargeFileConfirmation, PriorSession, RecoveryChoice,
    SessionConfig, SessionSlot, SessionStore, WriteOutcome,
};
use multipad_settings::{AppPaths, Preferences, PreferencesStore, RecentFilesStore};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "multipad",
    about = "Session and tab tooling for the Multipad editor core",
    author,
    version
)]
struct Cli {
    /// 指定資料目錄；預設為使用者資料夾。 / Data directory (defaults to the per-user location).
    #[arg(long, global = true, value_name = "PATH", env = "MULTIPAD_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 檢視或清除保存的工作階段。 / Inspect or clear the persisted session.
    #[command(subcommand)]
    Session(SessionCommand),
    /// 對檔案執行資源檢查。 / Run the resource checks against a path.
    Check(CheckArgs),
    /// 以無介面方式執行一次編輯工作階段。 / Run one headless editing session.
    Edit(EditArgs),
    /// 檢視或修改偏好設定。 / Show or change preferences.
    #[command(subcommand)]
    Preferences(PreferencesCommand),
    /// 列出最近開啟的檔案。 / List recently opened or saved files.
    Recent {
        /// 清空清單。 / Clear the list.
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// 顯示工作階段與自動儲存紀錄。 / Print the session and autosave records.
    Show {
        /// 以 JSON 輸出。 / Print raw JSON.
        #[arg(long)]
        json: bool,
    },
    /// 判斷上次是否正常結束。 / Tell whether the previous run shut down cleanly.
    Status,
    /// 刪除保存的紀錄。 / Delete the persisted records.
    Clear {
        /// 只刪除自動儲存紀錄。 / Only delete the autosave record.
        #[arg(long)]
        autosave_only: bool,
    },
}

#[derive(Args)]
struct CheckArgs {
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// 預計寫入的位元組數。 / Bytes that a write would need.
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    required: u64,
}

#[derive(Args)]
struct EditArgs {
    /// 要開啟的檔案。 / Files to open.
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// 以指定內容建立未命名分頁（可重複）。 / Create an untitled tab with this content (repeatable).
    #[arg(long = "new", value_name = "TEXT")]
    new_tabs: Vec<String>,

    /// 在目前分頁游標處輸入文字。 / Type text at the cursor of the current tab.
    #[arg(long, value_name = "TEXT")]
    append: Option<String>,

    /// 結束前儲存所有已命名的分頁。 / Save every named tab before quitting.
    #[arg(long)]
    save: bool,

    /// 捨棄當機後的復原資料。 / Discard crash-recovery data instead of restoring it.
    #[arg(long)]
    discard_recovery: bool,

    /// 允許開啟超過上限的檔案。 / Allow opening files above the hard size limit.
    #[arg(long)]
    confirm_large: bool,

    /// 自動儲存後不正常結束（測試復原用）。 / Autosave, then exit without a clean shutdown.
    #[arg(long, conflicts_with = "save")]
    crash: bool,
}

#[derive(Subcommand)]
enum PreferencesCommand {
    /// 輸出目前的偏好設定。 / Print the effective preferences as JSON.
    Show,
    /// 修改工作階段設定。 / Change session settings.
    Set(PreferencesSetArgs),
}

#[derive(Args)]
struct PreferencesSetArgs {
    #[arg(long, value_name = "true|false")]
    autosave: Option<bool>,

    /// 自動儲存間隔（秒）。 / Autosave interval in seconds.
    #[arg(long, value_name = "SECONDS")]
    autosave_interval: Option<u64>,

    #[arg(long, value_name = "true|false")]
    restore_on_startup: Option<bool>,

    /// 關閉時最後寫入的等待上限（毫秒）。 / Upper bound for the final write on quit, in milliseconds.
    #[arg(long, value_name = "MILLIS")]
    shutdown_timeout: Option<u64>,

    /// 最近檔案清單長度。 / Number of remembered recent files.
    #[arg(long, value_name = "COUNT")]
    recent_limit: Option<usize>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("MULTIPAD_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let Cli { data_dir, command } = Cli::parse();
    let paths = resolve_paths(data_dir)?;
    match command {
        Commands::Session(subcommand) => execute_session_command(subcommand, &paths),
        Commands::Check(args) => execute_check(args, &paths),
        Commands::Edit(args) => execute_edit(args, &paths),
        Commands::Preferences(subcommand) => execute_preferences_command(subcommand, &paths),
        Commands::Recent { clear } => execute_recent(clear, &paths),
    }
}

fn execute_session_command(command: SessionCommand, paths: &AppPaths) -> Result<()> {
    match command {
        SessionCommand::Show { json } => show_session(paths, json),
        SessionCommand::Status => session_status(paths),
        SessionCommand::Clear { autosave_only } => clear_session(paths, autosave_only),
    }
}

fn show_session(paths: &AppPaths, json: bool) -> Result<()> {
    for (label, path) in [
        ("session", paths.session_file()),
        ("autosave", paths.autosave_file()),
    ] {
        let slot = SessionSlot::new(&path, Arc::new(StdFileSystem));
        let data = slot
            .load()
            .with_context(|| format!("failed to read {label} record"))?;
        match data {
            None => println!("{label}: none ({})", path.display()),
            Some(data) if json => {
                println!("{label}:");
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Some(data) => print_session_data(label, &path, &data),
        }
    }
    Ok(())
}

fn print_session_data(label: &str, path: &Path, data: &SessionData) {
    println!(
        "{label}: {} tab(s), clean_shutdown={}, saved_at={} ({})",
        data.tabs.len(),
        data.clean_shutdown,
        data.saved_at_unix_ms,
        path.display()
    );
    for (index, tab) in data.tabs.iter().enumerate() {
        let marker = if data.current_tab_index == Some(index) {
            '>'
        } else {
            ' '
        };
        let name = tab
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(untitled)".to_string());
        let content = match &tab.content {
            Some(content) => format!("{} chars", content.chars().count()),
            None => "on disk".to_string(),
        };
        let dirty = if tab.is_dirty { " *" } else { "" };
        println!("  {marker} [{index}] {name}{dirty} ({content}, cursor {})", tab.cursor);
    }
}

fn session_status(paths: &AppPaths) -> Result<()> {
    let preferences = load_preferences(paths)?;
    let mut store = open_store(paths, &preferences);
    match store.open()? {
        PriorSession::None => println!("no previous session"),
        PriorSession::CleanShutdown(data) => {
            println!("previous session closed cleanly ({} tab(s))", data.tabs.len())
        }
        PriorSession::Crashed(data) => println!(
            "previous session crashed: {} tab(s), {} with unsaved changes",
            data.tabs.len(),
            data.dirty_tabs().count()
        ),
    }
    Ok(())
}

fn clear_session(paths: &AppPaths, autosave_only: bool) -> Result<()> {
    if autosave_only {
        SessionSlot::new(paths.autosave_file(), Arc::new(StdFileSystem))
            .remove()
            .context("failed to remove autosave record")?;
        println!("Removed {}", paths.autosave_file().display());
        return Ok(());
    }
    let preferences = load_preferences(paths)?;
    open_store(paths, &preferences)
        .clear_session()
        .context("failed to clear session")?;
    println!("Cleared session records in {}", paths.data_dir().display());
    Ok(())
}

fn execute_check(args: CheckArgs, paths: &AppPaths) -> Result<()> {
    let preferences = load_preferences(paths)?;
    let guard = resource_guard(&preferences);
    let path = resolve_input_path(&args.path)?;

    let access = guard.check_file_permissions(&path);
    match access {
        FileAccess::Missing { creatable } => {
            println!("access: missing (creatable: {})", yes_no(creatable))
        }
        FileAccess::Present { readable, writable } => println!(
            "access: readable: {}, writable: {}",
            yes_no(readable),
            yes_no(writable)
        ),
    }
    if access.exists() {
        let size = guard
            .file_system()
            .file_size(&path)
            .with_context(|| format!("failed to read size of {}", path.display()))?;
        let class = match guard.classify_file_size(size) {
            FileSizeClass::Normal => "normal",
            FileSizeClass::Large => "large (warning)",
            FileSizeClass::Huge => "huge (needs confirmation)",
        };
        println!("size: {} [{class}]", format_size(size));
    }

    let disk = guard.check_disk_space(&path, args.required);
    let available = disk
        .available_bytes
        .map(format_size)
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "disk: {} (available {available}, needed {})",
        if disk.ok { "ok" } else { "insufficient" },
        format_size(disk.required_bytes)
    );

    let memory = guard.check_memory_usage();
    let used = memory
        .used_bytes
        .map(format_size)
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "memory: {used}{}",
        if memory.threshold_exceeded {
            " (over threshold)"
        } else {
            ""
        }
    );
    Ok(())
}

fn execute_edit(args: EditArgs, paths: &AppPaths) -> Result<()> {
    let preferences = load_preferences(paths)?;
    let mut ctx = EditorContext::new(
        &preferences,
        paths,
        Arc::new(StdFileSystem),
        Arc::new(ProcessMemoryProbe),
    );

    let prior = ctx.open_session()?;
    let choice = if args.discard_recovery {
        RecoveryChoice::Discard
    } else {
        RecoveryChoice::Recover
    };
    let summary = ctx.resume(&prior, choice)?;
    if prior.is_crash() {
        match choice {
            RecoveryChoice::Recover => println!(
                "Recovered {} tab(s) from a previous crash",
                summary.restored.len()
            ),
            RecoveryChoice::Discard => println!("Discarded crash-recovery data"),
        }
    } else if !summary.restored.is_empty() {
        println!("Restored {} tab(s)", summary.restored.len());
    }
    for skipped in &summary.skipped {
        println!("Skipped {}", skipped.display());
    }

    let confirmation = if args.confirm_large {
        LargeFileConfirmation::Confirmed
    } else {
        LargeFileConfirmation::NotConfirmed
    };
    for file in &args.files {
        let path = resolve_input_path(file)?;
        let outcome = ctx
            .open_file(&path, confirmation)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if outcome.already_open {
            println!("Already open: {}", path.display());
        }
    }
    for text in &args.new_tabs {
        ctx.new_tab(Some(text));
    }
    if let Some(text) = &args.append {
        ctx.type_text(text)?;
    }

    if args.save {
        let saved = ctx.save_all();
        for id in &saved.saved {
            if let Some(path) = ctx.registry().get(*id).and_then(Document::path) {
                println!("Saved {}", path.display());
            }
        }
        if !saved.untitled.is_empty() {
            println!("{} untitled tab(s) left unsaved", saved.untitled.len());
        }
        if let Some((_, err)) = saved.failed.into_iter().next() {
            return Err(err).context("save failed");
        }
    }

    print_tabs(&ctx);
    print_reports(&ctx);

    if args.crash {
        match ctx.autosave_now() {
            AutosaveOutcome::Submitted(ticket) => {
                let outcome = ctx.store().writer().wait(ticket, Duration::from_secs(10));
                if outcome != WriteOutcome::Written {
                    bail!("autosave before crash did not complete: {outcome:?}");
                }
            }
            other => println!("Autosave: {other:?}"),
        }
        println!("Exiting without clean shutdown");
        return Ok(());
    }

    let report = ctx.shutdown()?;
    match report.final_write {
        Some(WriteOutcome::Written) => println!("Session saved"),
        None if report.session_cleared => println!("Session cleared"),
        other => println!("Session not saved cleanly: {other:?}"),
    }
    Ok(())
}

fn print_tabs(ctx: &EditorContext) {
    let registry = ctx.registry();
    let active = registry.active_id();
    for (index, doc) in registry.documents().enumerate() {
        let marker = if Some(doc.id()) == active { '>' } else { ' ' };
        println!("{marker} [{index}] {}", doc.display_title());
    }
}

fn print_reports(ctx: &EditorContext) {
    for report in ctx.reporter().history() {
        match report.suggestion {
            Some(suggestion) => eprintln!("warning: {} {}", report.message, suggestion),
            None => eprintln!("warning: {}", report.message),
        }
    }
}

fn execute_preferences_command(command: PreferencesCommand, paths: &AppPaths) -> Result<()> {
    match command {
        PreferencesCommand::Show => {
            let preferences = load_preferences(paths)?;
            println!("{}", serde_json::to_string_pretty(&preferences)?);
            Ok(())
        }
        PreferencesCommand::Set(args) => set_preferences(args, paths),
    }
}

fn set_preferences(args: PreferencesSetArgs, paths: &AppPaths) -> Result<()> {
    let prefs_path = paths.preferences_file();
    let mut store = PreferencesStore::load(&prefs_path)
        .with_context(|| format!("failed to load preferences from {}", prefs_path.display()))?;
    store
        .update(|prefs| {
            if let Some(enabled) = args.autosave {
                prefs.session.autosave_enabled = enabled;
            }
            if let Some(secs) = args.autosave_interval {
                prefs.session.autosave_interval_secs = secs;
            }
            if let Some(restore) = args.restore_on_startup {
                prefs.session.restore_on_startup = restore;
            }
            if let Some(millis) = args.shutdown_timeout {
                prefs.session.shutdown_timeout_ms = millis;
            }
            if let Some(limit) = args.recent_limit {
                prefs.session.recent_files_limit = limit;
            }
        })
        .with_context(|| format!("failed to save preferences to {}", prefs_path.display()))?;
    println!("Updated {}", prefs_path.display());
    Ok(())
}

fn execute_recent(clear: bool, paths: &AppPaths) -> Result<()> {
    let preferences = load_preferences(paths)?;
    let recent_path = paths.recent_files_file();
    let mut store = RecentFilesStore::load(
        &recent_path,
        preferences.session.recent_files_limit,
        Arc::new(StdFileSystem),
    )
    .with_context(|| format!("failed to read {}", recent_path.display()))?;
    if clear {
        store
            .clear()
            .with_context(|| format!("failed to write {}", recent_path.display()))?;
        println!("Cleared recent files");
        return Ok(());
    }
    if store.history().is_empty() {
        println!("no recent files");
    }
    for (index, path) in store.iter().enumerate() {
        println!("{}. {}", index + 1, path.display());
    }
    Ok(())
}

fn load_preferences(paths: &AppPaths) -> Result<Preferences> {
    let prefs_path = paths.preferences_file();
    let store = PreferencesStore::load(&prefs_path)
        .with_context(|| format!("failed to load preferences from {}", prefs_path.display()))?;
    Ok(store.preferences().clone())
}

fn resource_guard(preferences: &Preferences) -> ResourceGuard {
    ResourceGuard::new(
        Arc::new(StdFileSystem),
        Arc::new(ProcessMemoryProbe),
        preferences.limits.to_resource_limits(),
    )
}

fn open_store(paths: &AppPaths, preferences: &Preferences) -> SessionStore {
    let guard = resource_guard(preferences);
    let bus = EventBus::new();
    SessionStore::new(
        paths.session_file(),
        paths.autosave_file(),
        guard,
        ErrorReporter::new(bus.clone()),
        bus,
        SessionConfig {
            autosave_enabled: false,
            ..SessionConfig::from(&preferences.session)
        },
    )
}

fn resolve_paths(data_dir: Option<PathBuf>) -> Result<AppPaths> {
    match data_dir {
        Some(path) => Ok(AppPaths::with_root(resolve_input_path(&path)?)),
        None => match AppPaths::discover() {
            Some(paths) => Ok(paths),
            None => bail!("no home directory found; pass --data-dir"),
        },
    }
}

fn resolve_input_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()
            .context("determine current directory")?
            .join(path))
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
