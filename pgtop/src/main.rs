//! pgtop - Interactive terminal monitor for co-located PostgreSQL clusters.
//!
//! Grounded on the teacher's `crates/rpglotd/src/main.rs` (clap derive +
//! tracing-subscriber setup, `ctrlc`-driven shutdown flag) and
//! `src/tui/app.rs` (terminal setup/teardown, tick+key event loop).

mod cli;
mod event;

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{DisableMouseCapture, EnableMouseCapture, KeyCode};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use pgtop_core::app::App;
use pgtop_core::cluster::ClusterHandle;
use pgtop_core::collector::procfs::RealFs;
use pgtop_core::config;
use pgtop_core::display::line::{ConsoleDisplayer, JsonDisplayer};
use pgtop_core::display::terminal::TerminalDisplayer;
use pgtop_core::error::{check_sql_driver, StartupError};
use pgtop_core::resolver::{discover_clusters, DiscoveryFilter};

use cli::{exit_code, Cli, OutputMode};
use event::{Event, EventHandler};

const DEFAULT_USER: &str = "postgres";
const DEFAULT_DBNAME: &str = "postgres";

fn init_logging(log_file: Option<&std::path::Path>) {
    let filter = EnvFilter::from_default_env().add_directive("pgtop=info".parse().unwrap());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    match log_file {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                builder.with_writer(std::sync::Mutex::new(file)).init();
            }
            Err(e) => {
                builder.init();
                warn!("failed to open log file {}: {e}, logging to stderr", path.display());
            }
        },
        None => builder.with_writer(io::stderr).init(),
    }
}

/// Everything startup needs before the main loop can run: discovered
/// clusters bundled into `ClusterHandle`s plus the shared tick length.
fn build_app(cli: &Cli) -> Result<App<RealFs>, StartupError> {
    let fs = RealFs::new();

    let cluster_config = match &cli.config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| StartupError::Config(format!("reading {}: {e}", path.display())))?;
            config::parse(&content).map_err(|e| StartupError::Config(e.to_string()))?
        }
        None => config::ClusterConfig::default(),
    };

    let default_user = cli.user.clone().unwrap_or_else(|| DEFAULT_USER.to_string());
    let default_dbname = cli.dbname.clone().unwrap_or_else(|| DEFAULT_DBNAME.to_string());

    let filter = DiscoveryFilter {
        instance_name: cli.instance.as_deref(),
        server_version: cli.server_version,
        user: &default_user,
        dbname: &default_dbname,
    };
    let discovered = discover_clusters(&fs, "/proc", &filter);
    if discovered.is_empty() {
        return Err(StartupError::Config("no reachable PostgreSQL clusters found".to_string()));
    }

    let always_track: HashSet<i32> = cli.always_track.iter().copied().collect();
    let tick_len = Duration::from_secs(cli.tick_secs.max(1));

    let clusters: Vec<ClusterHandle<RealFs>> = discovered
        .into_iter()
        .map(|(descriptor, _trial_client)| {
            let instance_cfg = cluster_config.instances.get(&descriptor.name);
            ClusterHandle::new(
                fs.clone(),
                "/proc",
                descriptor,
                &default_user,
                &default_dbname,
                instance_cfg,
                always_track.clone(),
                tick_len,
            )
        })
        .collect();

    Ok(App::new(fs, "/proc", clusters, tick_len))
}

fn run_console(mut app: App<RealFs>, tick_len: Duration, clear_screen: bool, quit: Arc<AtomicBool>) {
    let stdout = io::stdout();
    while !quit.load(Ordering::SeqCst) && !app.should_quit {
        app.run_tick();
        if clear_screen {
            print!("\x1b[2J\x1b[H");
        }
        let mut displayer = ConsoleDisplayer::new(stdout.lock());
        app.output(&mut displayer);
        std::thread::sleep(tick_len);
    }
}

fn run_json(mut app: App<RealFs>, tick_len: Duration, quit: Arc<AtomicBool>) {
    let stdout = io::stdout();
    while !quit.load(Ordering::SeqCst) && !app.should_quit {
        app.run_tick();
        let mut displayer = JsonDisplayer::new(stdout.lock());
        app.output(&mut displayer);
        displayer.flush_tick();
        std::thread::sleep(tick_len);
    }
}

fn run_curses(mut app: App<RealFs>, tick_len: Duration, quit: Arc<AtomicBool>) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let events = EventHandler::new(tick_len);
    app.run_tick();

    loop {
        terminal.draw(|frame| {
            let area = frame.area();
            let mut displayer = TerminalDisplayer::new(frame, area);
            app.output(&mut displayer);
        })?;

        if quit.load(Ordering::SeqCst) {
            break;
        }

        match events.next() {
            Ok(Event::Tick) => app.run_tick(),
            Ok(Event::Key(key)) => {
                if let KeyCode::Char(c) = key.code {
                    app.handle_key(c);
                }
            }
            Ok(Event::Resize(_, _)) => {}
            Err(_) => app.should_quit = true,
        }

        if app.should_quit {
            break;
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref());

    if let Err(e) = check_sql_driver() {
        eprintln!("{e}");
        std::process::exit(exit_code::MISSING_SQL_DRIVER);
    }

    let app = match build_app(&cli) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(exit_code::BAD_ARGS_OR_NO_CLUSTERS);
        }
    };

    info!("pgtop {} starting, {} cluster(s) discovered", env!("CARGO_PKG_VERSION"), app.clusters.len());

    let tick_len = app.tick_len;
    let quit = Arc::new(AtomicBool::new(false));
    let quit_handler = quit.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        quit_handler.store(true, Ordering::SeqCst);
    }) {
        warn!("failed to install Ctrl-C handler: {e}");
    }

    let result = match cli.output {
        OutputMode::Console => {
            run_console(app, tick_len, cli.clear_screen, quit);
            Ok(())
        }
        OutputMode::Json => {
            run_json(app, tick_len, quit);
            Ok(())
        }
        OutputMode::Curses => run_curses(app, tick_len, quit),
    };

    if let Err(e) = result {
        eprintln!("pgtop: terminal error: {e}");
        std::process::exit(exit_code::BAD_ARGS_OR_NO_CLUSTERS);
    }
    std::process::exit(exit_code::OK);
}

#[cfg(not(target_os = "linux"))]
fn main() {
    eprintln!("pgtop only supports Linux hosts");
    std::process::exit(243);
}
